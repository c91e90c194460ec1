//! Shared fixtures for parley-session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use parley_session::presence::StatusRanking;
use parley_session::{
    Account, EngineError, InboundEvent, NotificationSink, OutboundCommand, ProtocolEngine,
    RequestId, Session, SessionNotification,
};

/// Engine double that records every command.
#[derive(Default)]
pub struct RecordingEngine {
    commands: Mutex<Vec<OutboundCommand>>,
    refuse: AtomicBool,
}

impl RecordingEngine {
    pub fn commands(&self) -> Vec<OutboundCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<OutboundCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }

    /// Make every following send fail with `EngineError::Closed`.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Request ids of the roster sets and removes recorded so far.
    pub fn roster_requests(&self) -> Vec<RequestId> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                OutboundCommand::RosterUpdate { request_id, .. }
                | OutboundCommand::RosterRemove { request_id, .. } => Some(request_id),
                _ => None,
            })
            .collect()
    }
}

impl ProtocolEngine for RecordingEngine {
    fn send(&self, command: OutboundCommand) -> Result<(), EngineError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

/// Sink double that keeps every notification in order.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<SessionNotification>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<SessionNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<SessionNotification> {
        std::mem::take(&mut *self.notifications.lock().unwrap())
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: SessionNotification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("parley_session=debug")
            .with_test_writer()
            .try_init();
    });
}

pub struct Fixture {
    pub session: Arc<Session>,
    pub engine: Arc<RecordingEngine>,
    pub sink: Arc<RecordingSink>,
}

impl Fixture {
    /// Apply an inbound event.
    pub fn event(&self, event: InboundEvent) {
        self.session.handle_event(event);
    }

    /// Forget recorded commands and notifications.
    pub fn clear(&self) {
        self.engine.take();
        self.sink.take();
    }
}

pub fn account() -> Account {
    Account {
        jid: "me@example.com".to_string(),
        resource: "parley".to_string(),
        nick: "me".to_string(),
        priority: 5,
    }
}

/// A session that has not connected yet.
pub fn session() -> Fixture {
    let engine = Arc::new(RecordingEngine::default());
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(
        account(),
        StatusRanking::default(),
        true,
        engine.clone(),
        sink.clone(),
    );
    Fixture {
        session: Arc::new(session),
        engine,
        sink,
    }
}

/// A connected session with an empty roster and nothing recorded.
pub fn connected_session() -> Fixture {
    let fixture = session();
    fixture.session.connect().unwrap();
    fixture.session.provide_password("secret").unwrap();
    fixture.event(InboundEvent::StreamConnected);
    fixture.event(InboundEvent::RosterReceived(Vec::new()));
    fixture.clear();
    fixture
}
