//! hass-ws - command-line client for the Home Assistant WebSocket API.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hass_ws_config_and_utils::{init_logging, Config, Paths, ENV_SERVER, ENV_TOKEN};

/// hass-ws command-line interface.
#[derive(Parser)]
#[command(name = "hass-ws")]
#[command(about = "Query and control Home Assistant over its WebSocket API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Home Assistant address, e.g. http://homeassistant.local:8123
    #[arg(long, env = ENV_SERVER, global = true)]
    server: Option<String>,

    /// Long-lived access token
    #[arg(long, env = ENV_TOKEN, global = true, hide_env_values = true)]
    token: Option<String>,

    /// Log level. Defaults to the configured level
    #[arg(
        short,
        long,
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: Option<String>,

    /// Directory holding config.json. Defaults to <config dir>/hass-ws
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show the server version and address
    Info,
    /// List entity states
    States {
        /// Only show entities of this domain (e.g. light)
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// Show the core configuration
    Config,
    /// List available services
    Services {
        /// Only show services of this domain
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// List frontend panels
    Panels,
    /// Call a service
    CallService {
        /// Service domain (e.g. light)
        domain: String,
        /// Service name (e.g. turn_on)
        service: String,
        /// Target entity; repeat for several
        #[arg(short, long = "entity-id")]
        entity_id: Vec<String>,
        /// Service data as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Print events as they arrive
    Listen {
        /// Only listen for this event type (e.g. state_changed)
        #[arg(short, long)]
        event_type: Option<String>,
        /// Stop after this many events
        #[arg(short, long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration; flags override file and environment
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(server) = cli.server {
        config.server = Some(server);
    }
    if let Some(token) = cli.token {
        config.access_token = Some(token);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);

    app::run(cli.command, config.session_config()?).await
}
