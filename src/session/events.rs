//! Coordinator Events
//!
//! Caller-facing completion events and the broadcast emitter that publishes
//! them.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::descriptor::{ConnectionInfo, SessionId};
use crate::discovery::SearchResult;
use crate::error::JoinError;
use crate::lifecycle::LifecycleState;

/// Join completion result code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinResultCode {
    Success,
    InvalidInterface,
    Timeout,
    AlreadyInSession,
    Rejected,
}

impl From<&Result<ConnectionInfo, JoinError>> for JoinResultCode {
    fn from(result: &Result<ConnectionInfo, JoinError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(JoinError::InvalidInterface) => Self::InvalidInterface,
            Err(JoinError::Timeout) => Self::Timeout,
            Err(JoinError::AlreadyInSession) => Self::AlreadyInSession,
            Err(JoinError::Rejected(_)) => Self::Rejected,
        }
    }
}

/// Events published by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoordinatorEvent {
    /// Lifecycle state changed
    StateChanged {
        old_state: LifecycleState,
        new_state: LifecycleState,
    },

    /// A create request finished
    CreateComplete {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    /// A search finished; `success` is false only when the directory failed
    FindComplete {
        results: Vec<SearchResult>,
        success: bool,
    },

    /// A join finished
    JoinComplete {
        result: JoinResultCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        connect_string: Option<String>,
    },

    /// A start request finished
    StartComplete { success: bool },

    /// A destroy finished
    DestroyComplete { success: bool },
}

impl CoordinatorEvent {
    /// Stable event name for logging and external bridges
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "session-state",
            Self::CreateComplete { .. } => "session-create-complete",
            Self::FindComplete { .. } => "session-find-complete",
            Self::JoinComplete { .. } => "session-join-complete",
            Self::StartComplete { .. } => "session-start-complete",
            Self::DestroyComplete { .. } => "session-destroy-complete",
        }
    }

    /// Whether this event answers a caller request
    pub fn is_completion(&self) -> bool {
        !matches!(self, Self::StateChanged { .. })
    }
}

/// Broadcast emitter for coordinator events
pub struct EventEmitter {
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: CoordinatorEvent) {
        debug!("Emitting {}", event.event_name());
        let _ = self.event_tx.send(event);
    }

    pub fn emit_state(&self, old_state: LifecycleState, new_state: LifecycleState) {
        if old_state != new_state {
            self.emit(CoordinatorEvent::StateChanged { old_state, new_state });
        }
    }

    pub fn emit_create(&self, success: bool, session_id: Option<SessionId>) {
        self.emit(CoordinatorEvent::CreateComplete { success, session_id });
    }

    pub fn emit_find(&self, results: Vec<SearchResult>, success: bool) {
        self.emit(CoordinatorEvent::FindComplete { results, success });
    }

    pub fn emit_join(&self, result: &Result<ConnectionInfo, JoinError>) {
        self.emit(CoordinatorEvent::JoinComplete {
            result: JoinResultCode::from(result),
            connect_string: result.as_ref().ok().map(|c| c.connect_string.clone()),
        });
    }

    pub fn emit_start(&self, success: bool) {
        self.emit(CoordinatorEvent::StartComplete { success });
    }

    pub fn emit_destroy(&self, success: bool) {
        self.emit(CoordinatorEvent::DestroyComplete { success });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = CoordinatorEvent::CreateComplete {
            success: true,
            session_id: None,
        };
        assert_eq!(event.event_name(), "session-create-complete");
        assert!(event.is_completion());

        let state = CoordinatorEvent::StateChanged {
            old_state: LifecycleState::Idle,
            new_state: LifecycleState::Creating,
        };
        assert!(!state.is_completion());
    }

    #[test]
    fn test_event_serialization() {
        let event = CoordinatorEvent::JoinComplete {
            result: JoinResultCode::Timeout,
            connect_string: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "joinComplete");
        assert_eq!(json["result"], "timeout");
        assert!(json.get("connect_string").is_none());
    }

    #[test]
    fn test_unchanged_state_is_not_emitted() {
        let emitter = EventEmitter::default();
        let mut rx = emitter.subscribe();

        emitter.emit_state(LifecycleState::Idle, LifecycleState::Idle);
        emitter.emit_destroy(false);

        assert!(matches!(
            rx.try_recv().unwrap(),
            CoordinatorEvent::DestroyComplete { success: false }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_join_result_codes() {
        let failed: Result<ConnectionInfo, JoinError> = Err(JoinError::Rejected("full".into()));
        assert_eq!(JoinResultCode::from(&failed), JoinResultCode::Rejected);
        let timeout: Result<ConnectionInfo, JoinError> = Err(JoinError::Timeout);
        assert_eq!(JoinResultCode::from(&timeout), JoinResultCode::Timeout);
    }
}
