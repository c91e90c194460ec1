//! Inbound event dispatch.
//!
//! The protocol engine pushes [`InboundEvent`]s into a bounded queue; one
//! loop applies them to the session, each to completion before the next.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::InboundEvent;
use crate::session::Session;

/// Create the queue the engine delivers events through.
pub fn event_queue(capacity: usize) -> (mpsc::Sender<InboundEvent>, mpsc::Receiver<InboundEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Apply events until the queue closes or `stop_token` is cancelled.
///
/// Returns the number of events applied.
pub async fn run(
    session: Arc<Session>,
    mut events: mpsc::Receiver<InboundEvent>,
    stop_token: CancellationToken,
) -> usize {
    let mut applied = 0;
    loop {
        tokio::select! {
            biased;
            _ = stop_token.cancelled() => {
                info!(applied, "Dispatch loop stopped (shutdown token cancelled)");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        debug!(?event, "Dispatching event");
                        session.handle_event(event);
                        applied += 1;
                    }
                    None => {
                        info!(applied, "Event queue closed");
                        break;
                    }
                }
            }
        }
    }
    applied
}

/// Run the dispatch loop on its own task.
pub fn spawn(
    session: Arc<Session>,
    events: mpsc::Receiver<InboundEvent>,
    stop_token: CancellationToken,
) -> JoinHandle<usize> {
    tokio::spawn(run(session, events, stop_token))
}
