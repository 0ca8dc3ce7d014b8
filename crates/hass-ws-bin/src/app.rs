//! Subcommand implementations.

use crate::Commands;
use hass_ws_client::{HassClient, ServiceTarget, Targets};
use hass_ws_core::SessionConfig;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use tracing::{info, warn};

/// Connect, run one subcommand, and close the session.
pub async fn run(command: Commands, config: SessionConfig) -> Result<(), Box<dyn Error>> {
    let client = HassClient::connect(config).await?;
    let result = execute(&client, command).await;
    client.close().await;
    result
}

async fn execute(client: &HassClient, command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Info => print_json(&client.meta())?,
        Commands::States { domain } => {
            let mut states = client.states().await?;
            if let Some(domain) = domain {
                states.retain(|entity| entity.domain() == domain);
            }
            states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
            print_json(&states)?;
        }
        Commands::Config => print_json(&client.config().await?)?,
        Commands::Services { domain } => {
            let mut services = client.services().await?;
            if let Some(domain) = domain {
                services.retain(|name, _| *name == domain);
            }
            print_json(&services)?;
        }
        Commands::Panels => print_json(&client.panels().await?)?,
        Commands::CallService {
            domain,
            service,
            entity_id,
            data,
        } => {
            let target = service_target(entity_id);
            let data = parse_service_data(data.as_deref())?;
            let success = client.call_service(&domain, &service, target, data).await?;
            print_json(&serde_json::json!({ "success": success }))?;
            if !success {
                return Err(format!("{domain}.{service} failed").into());
            }
        }
        Commands::Listen { event_type, count } => {
            listen(client, event_type.as_deref(), count).await?;
        }
    }
    Ok(())
}

async fn listen(
    client: &HassClient,
    event_type: Option<&str>,
    count: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let mut listener = client.listen(event_type).await?;
    info!(event_type = ?event_type, "Listening for events (Ctrl-C to stop)");

    let mut received = 0usize;
    while count.map_or(true, |limit| received < limit) {
        let next = tokio::select! {
            next = listener.next_event() => next,
            _ = tokio::signal::ctrl_c() => break,
        };

        match next {
            Some(Ok(event)) => {
                print_json(&event)?;
                received += 1;
            }
            Some(Err(e)) => warn!(error = %e, "Skipping event"),
            None => break,
        }
    }

    listener.cancel().await;
    Ok(())
}

fn service_target(mut entity_ids: Vec<String>) -> ServiceTarget {
    match entity_ids.len() {
        0 => ServiceTarget::default(),
        1 => ServiceTarget::entities(Targets::One(entity_ids.remove(0))),
        _ => ServiceTarget::entities(entity_ids),
    }
}

fn parse_service_data(raw: Option<&str>) -> Result<Map<String, Value>, Box<dyn Error>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw)? {
            Value::Object(map) => Ok(map),
            _ => Err("--data must be a JSON object".into()),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_service_data() {
        assert!(parse_service_data(None).unwrap().is_empty());

        let data = parse_service_data(Some(r#"{"brightness": 120}"#)).unwrap();
        assert_eq!(data.get("brightness"), Some(&json!(120)));

        assert!(parse_service_data(Some("[1, 2]")).is_err());
        assert!(parse_service_data(Some("{oops")).is_err());
    }

    #[test]
    fn test_service_target() {
        assert!(service_target(Vec::new()).is_empty());
        assert_eq!(
            service_target(vec!["light.kitchen".to_string()]),
            ServiceTarget::entities("light.kitchen")
        );
        assert_eq!(
            serde_json::to_value(service_target(vec![
                "light.a".to_string(),
                "light.b".to_string()
            ]))
            .unwrap(),
            json!({ "entity_id": ["light.a", "light.b"] })
        );
    }
}
