//! The reader loop.
//!
//! One dispatcher task runs per connection and owns the connection's read
//! half. It decodes every inbound frame and routes it by ID to the waiting
//! call or the matching subscription.

use crate::session::{SessionState, Shared, Shutdown};
use crate::subscription::DeliveryOutcome;
use crate::transport::FrameStream;
use hass_ws_protocol::Envelope;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped(Shutdown),
    PeerClosed,
    TransportFailed,
}

/// Run until the peer closes, the transport fails, or `shutdown` fires.
///
/// The connection is always torn down before returning. The session moves
/// to [`SessionState::Closed`] unless a [`Shutdown::Handoff`] was requested,
/// in which case the requester drives the state.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut stream: Box<dyn FrameStream>,
    mut shutdown: oneshot::Receiver<Shutdown>,
) {
    debug!(server = %shared.server(), "Dispatcher started");

    let exit = loop {
        let next = tokio::select! {
            biased;
            mode = &mut shutdown => break Exit::Stopped(mode.unwrap_or(Shutdown::Close)),
            next = stream.recv() => next,
        };

        match next {
            Some(Ok(frame)) => route(&shared, &frame),
            Some(Err(e)) => {
                error!(error = %e, "Transport read failed");
                break Exit::TransportFailed;
            }
            None => break Exit::PeerClosed,
        }
    };

    debug!(exit = ?exit, "Dispatcher stopped");
    shared.mark_transport_closed();

    if exit == Exit::Stopped(Shutdown::Handoff) {
        shared.teardown().await;
        return;
    }

    if exit != Exit::Stopped(Shutdown::Close) {
        info!(server = %shared.server(), "Connection lost");
    }
    shared.set_state(SessionState::Closing);
    shared.teardown().await;
    shared.set_state(SessionState::Closed);
}

fn route(shared: &Shared, frame: &str) {
    let envelope = match Envelope::decode(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping malformed frame");
            return;
        }
    };

    match envelope {
        Envelope::Result(response) => {
            let id = response.id;
            if !shared.pending.resolve(response) {
                debug!(id, "Dropping result with no waiting call");
            }
        }
        Envelope::Event { id, event } => match shared.subscriptions.deliver(id, event) {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::Cancelled => {
                debug!(id, "Dropping event for cancelled subscription");
            }
            DeliveryOutcome::Unknown => {
                debug!(id, "Dropping event for unknown subscription");
            }
        },
        Envelope::Unroutable { kind } => {
            debug!(kind = %kind, "Dropping unroutable frame");
        }
    }
}
