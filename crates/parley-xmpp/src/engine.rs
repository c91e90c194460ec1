//! A [`ProtocolEngine`] that hands encoded stanzas to the stream task.

use minidom::Element;
use tokio::sync::mpsc;
use tracing::warn;

use parley_session::{EngineError, OutboundCommand, ProtocolEngine};

use crate::outbound::StanzaWriter;

/// What the stream task receives from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Write this stanza to the stream
    Stanza(Element),
    /// A command with no stanza of its own (connect, disconnect, transfers)
    Control(OutboundCommand),
}

/// Encodes commands with a [`StanzaWriter`] and queues the result on a
/// bounded tokio channel.
#[derive(Debug)]
pub struct StanzaEngine {
    writer: StanzaWriter,
    sender: mpsc::Sender<EngineRequest>,
}

impl StanzaEngine {
    pub fn channel(
        account_jid: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<EngineRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let engine = Self {
            writer: StanzaWriter::new(account_jid),
            sender,
        };
        (engine, receiver)
    }
}

impl ProtocolEngine for StanzaEngine {
    fn send(&self, command: OutboundCommand) -> Result<(), EngineError> {
        let request = match self.writer.encode(&command) {
            Ok(Some(stanza)) => EngineRequest::Stanza(stanza),
            Ok(None) => EngineRequest::Control(command),
            Err(e) => {
                warn!(error = %e, "Failed to encode command");
                return Err(EngineError::Rejected(e.to_string()));
            }
        };

        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("Stanza queue full");
                EngineError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => EngineError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_session::message::{MessageKind, OutboundMessage};

    use super::*;
    use crate::ns;

    #[tokio::test]
    async fn test_stanzas_and_control_commands() {
        let (engine, mut rx) = StanzaEngine::channel("me@example.com", 8);

        engine.send(OutboundCommand::RequestRoster).unwrap();
        engine.send(OutboundCommand::Disconnect).unwrap();

        match rx.recv().await {
            Some(EngineRequest::Stanza(stanza)) => {
                assert_eq!(stanza.name(), "iq");
                assert!(stanza.get_child("query", ns::ROSTER).is_some());
            }
            other => panic!("unexpected request: {other:?}"),
        }
        assert_eq!(
            rx.recv().await,
            Some(EngineRequest::Control(OutboundCommand::Disconnect))
        );
    }

    #[test]
    fn test_encoding_failure_is_rejected() {
        let (engine, _rx) = StanzaEngine::channel("me@example.com", 8);
        let result = engine.send(OutboundCommand::SendMessage(OutboundMessage {
            id: "m1".to_string(),
            to: "@@".to_string(),
            kind: MessageKind::Chat,
            body: Some("hi".to_string()),
            ..Default::default()
        }));
        assert!(matches!(result, Err(EngineError::Rejected(_))));
    }

    #[test]
    fn test_full_and_closed() {
        let (engine, rx) = StanzaEngine::channel("me@example.com", 1);
        engine.send(OutboundCommand::Disconnect).unwrap();
        assert_eq!(
            engine.send(OutboundCommand::Disconnect),
            Err(EngineError::QueueFull)
        );

        drop(rx);
        assert_eq!(
            engine.send(OutboundCommand::Disconnect),
            Err(EngineError::Closed)
        );
    }
}
