//! Lifecycle State Machine
//!
//! Pure transition logic: which request is admitted, which phase is
//! pending, and where each completion leads. Exactly one operation may be
//! pending at a time. The coordinator drives this under a lock and does the
//! async work.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::discovery::SearchOutcome;
use crate::error::{CoordinatorError, JoinError};
use crate::session::{ConnectionInfo, HostSettings};

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// No session, nothing pending
    Idle,
    /// Publishing a new session
    Creating,
    /// Hosting and/or joined to a session
    Created,
    /// Tearing the session down
    Destroying,
    /// Search in flight
    Finding,
    /// Join handshake in flight
    Joining,
    /// Marking the hosted match as started
    Starting,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Destroying => write!(f, "destroying"),
            Self::Finding => write!(f, "finding"),
            Self::Joining => write!(f, "joining"),
            Self::Starting => write!(f, "starting"),
        }
    }
}

/// Operation kinds that can be pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Creating,
    Destroying,
    Finding,
    Joining,
    Starting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "create"),
            Self::Destroying => write!(f, "destroy"),
            Self::Finding => write!(f, "find"),
            Self::Joining => write!(f, "join"),
            Self::Starting => write!(f, "start"),
        }
    }
}

pub type Reply<T> = oneshot::Sender<T>;
pub type JoinReply = Reply<Result<ConnectionInfo, JoinError>>;

/// Identifies one admitted operation; completions carrying a stale id are
/// discarded
pub type OpId = u64;

/// Work queued behind a destroy
#[derive(Debug)]
pub enum Continuation {
    /// Create again with these settings once the old session is gone
    Recreate {
        settings: HostSettings,
        timeout: Duration,
        reply: Reply<bool>,
    },
}

/// The single in-flight operation
#[derive(Debug, Default)]
pub enum PendingOperation {
    #[default]
    None,
    Creating {
        op: OpId,
        reply: Reply<bool>,
    },
    Destroying {
        op: OpId,
        reply: Option<Reply<bool>>,
        continuation: Option<Continuation>,
    },
    Finding {
        op: OpId,
        resume: LifecycleState,
        reply: Reply<SearchOutcome>,
    },
    Joining {
        op: OpId,
        resume: LifecycleState,
        reply: JoinReply,
    },
    Starting {
        op: OpId,
        reply: Reply<bool>,
    },
}

impl PendingOperation {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::None => None,
            Self::Creating { .. } => Some(Phase::Creating),
            Self::Destroying { .. } => Some(Phase::Destroying),
            Self::Finding { .. } => Some(Phase::Finding),
            Self::Joining { .. } => Some(Phase::Joining),
            Self::Starting { .. } => Some(Phase::Starting),
        }
    }

    pub fn op_id(&self) -> Option<OpId> {
        match self {
            Self::None => None,
            Self::Creating { op, .. }
            | Self::Destroying { op, .. }
            | Self::Finding { op, .. }
            | Self::Joining { op, .. }
            | Self::Starting { op, .. } => Some(*op),
        }
    }

    pub fn has_continuation(&self) -> bool {
        matches!(self, Self::Destroying { continuation: Some(_), .. })
    }
}

/// What an admitted create must do first
#[derive(Debug, PartialEq, Eq)]
pub enum CreatePlan {
    Create(OpId),
    /// A session exists; destroy it, then recreate from the continuation
    DestroyFirst(OpId),
}

/// Result of a finished destroy
#[derive(Debug)]
pub struct DestroyDone {
    pub reply: Option<Reply<bool>>,
    pub continuation: Option<Continuation>,
}

/// Lifecycle state plus the pending operation slot
#[derive(Debug, Default)]
pub struct Machine {
    state: LifecycleState,
    pending: PendingOperation,
    next_op: OpId,
    shut_down: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pending_phase(&self) -> Option<Phase> {
        self.pending.phase()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Whether `op` is still the pending operation
    pub fn is_current(&self, op: OpId) -> bool {
        self.pending.op_id() == Some(op)
    }

    fn next_op(&mut self) -> OpId {
        self.next_op += 1;
        self.next_op
    }

    /// Admission check. Nothing is ever queued: a request made while any
    /// operation is pending is refused here.
    pub fn admit(&self, phase: Phase) -> Result<(), CoordinatorError> {
        if self.shut_down {
            return Err(CoordinatorError::ShutDown);
        }
        match self.pending.phase() {
            None => Ok(()),
            Some(Phase::Joining) if phase == Phase::Joining => {
                Err(CoordinatorError::Join(JoinError::AlreadyInSession))
            }
            Some(pending) => Err(CoordinatorError::AlreadyInProgress(pending)),
        }
    }

    /// `Idle -> Creating`, or `Created -> Destroying` with a queued recreate
    pub fn begin_create(&mut self, settings: HostSettings, timeout: Duration, reply: Reply<bool>, has_session: bool) -> CreatePlan {
        let op = self.next_op();
        if has_session {
            self.state = LifecycleState::Destroying;
            self.pending = PendingOperation::Destroying {
                op,
                reply: None,
                continuation: Some(Continuation::Recreate {
                    settings,
                    timeout,
                    reply,
                }),
            };
            CreatePlan::DestroyFirst(op)
        } else {
            self.state = LifecycleState::Creating;
            self.pending = PendingOperation::Creating { op, reply };
            CreatePlan::Create(op)
        }
    }

    /// Re-enter `Idle -> Creating` for a continuation that survived its destroy
    pub fn resume_create(&mut self, reply: Reply<bool>) -> OpId {
        let op = self.next_op();
        self.state = LifecycleState::Creating;
        self.pending = PendingOperation::Creating { op, reply };
        op
    }

    /// `Creating -> Created | Idle`
    pub fn finish_create(&mut self, op: OpId, success: bool) -> Option<Reply<bool>> {
        if !matches!(self.pending, PendingOperation::Creating { op: current, .. } if current == op) {
            return None;
        }
        match std::mem::take(&mut self.pending) {
            PendingOperation::Creating { reply, .. } => {
                self.state = if success { LifecycleState::Created } else { LifecycleState::Idle };
                Some(reply)
            }
            _ => None,
        }
    }

    /// `Created -> Destroying`
    pub fn begin_destroy(&mut self, reply: Reply<bool>) -> OpId {
        let op = self.next_op();
        self.state = LifecycleState::Destroying;
        self.pending = PendingOperation::Destroying {
            op,
            reply: Some(reply),
            continuation: None,
        };
        op
    }

    /// `Destroying -> Idle`, or back to `Created` when the session survived
    pub fn finish_destroy(&mut self, op: OpId, success: bool, has_session: bool) -> Option<DestroyDone> {
        if !matches!(self.pending, PendingOperation::Destroying { op: current, .. } if current == op) {
            return None;
        }
        match std::mem::take(&mut self.pending) {
            PendingOperation::Destroying {
                reply, continuation, ..
            } => {
                self.state = if success || !has_session {
                    LifecycleState::Idle
                } else {
                    LifecycleState::Created
                };
                Some(DestroyDone { reply, continuation })
            }
            _ => None,
        }
    }

    /// `Idle|Created -> Finding`
    pub fn begin_find(&mut self, reply: Reply<SearchOutcome>) -> OpId {
        let op = self.next_op();
        let resume = self.state;
        self.state = LifecycleState::Finding;
        self.pending = PendingOperation::Finding { op, resume, reply };
        op
    }

    /// `Finding -> prior state`
    pub fn finish_find(&mut self, op: OpId) -> Option<Reply<SearchOutcome>> {
        if !matches!(self.pending, PendingOperation::Finding { op: current, .. } if current == op) {
            return None;
        }
        match std::mem::take(&mut self.pending) {
            PendingOperation::Finding { resume, reply, .. } => {
                self.state = resume;
                Some(reply)
            }
            _ => None,
        }
    }

    /// `Idle|Created -> Joining`
    pub fn begin_join(&mut self, reply: JoinReply) -> OpId {
        let op = self.next_op();
        let resume = self.state;
        self.state = LifecycleState::Joining;
        self.pending = PendingOperation::Joining { op, resume, reply };
        op
    }

    /// `Joining -> Created` on success, prior state otherwise
    pub fn finish_join(&mut self, op: OpId, success: bool) -> Option<JoinReply> {
        if !matches!(self.pending, PendingOperation::Joining { op: current, .. } if current == op) {
            return None;
        }
        match std::mem::take(&mut self.pending) {
            PendingOperation::Joining { resume, reply, .. } => {
                self.state = if success { LifecycleState::Created } else { resume };
                Some(reply)
            }
            _ => None,
        }
    }

    /// `Created -> Starting`
    pub fn begin_start(&mut self, reply: Reply<bool>) -> OpId {
        let op = self.next_op();
        self.state = LifecycleState::Starting;
        self.pending = PendingOperation::Starting { op, reply };
        op
    }

    /// `Starting -> Created`
    pub fn finish_start(&mut self, op: OpId) -> Option<Reply<bool>> {
        if !matches!(self.pending, PendingOperation::Starting { op: current, .. } if current == op) {
            return None;
        }
        match std::mem::take(&mut self.pending) {
            PendingOperation::Starting { reply, .. } => {
                self.state = LifecycleState::Created;
                Some(reply)
            }
            _ => None,
        }
    }

    /// Refuse all further requests and hand back whatever was pending.
    /// The state becomes `Destroying` when a local session must still be
    /// torn down.
    pub fn shut_down(&mut self, has_local: bool) -> PendingOperation {
        self.shut_down = true;
        self.state = if has_local {
            LifecycleState::Destroying
        } else {
            LifecycleState::Idle
        };
        std::mem::take(&mut self.pending)
    }

    /// Final step of shutdown teardown
    pub fn settle_idle(&mut self) {
        self.state = LifecycleState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;

    fn settings(capacity: u32, match_type: &str) -> HostSettings {
        HostSettings::new(&CoordinatorConfig::default(), capacity, match_type)
    }

    fn reply<T>() -> (Reply<T>, oneshot::Receiver<T>) {
        oneshot::channel()
    }

    #[test]
    fn test_create_from_idle() {
        let mut machine = Machine::new();
        machine.admit(Phase::Creating).unwrap();
        let (tx, _rx) = reply();

        let plan = machine.begin_create(settings(4, "Deathmatch"), Duration::from_secs(1), tx, false);
        let CreatePlan::Create(op) = plan else {
            panic!("expected a plain create");
        };
        assert_eq!(machine.state(), LifecycleState::Creating);
        assert_eq!(machine.pending_phase(), Some(Phase::Creating));

        assert!(machine.finish_create(op, true).is_some());
        assert_eq!(machine.state(), LifecycleState::Created);
        assert_eq!(machine.pending_phase(), None);
    }

    #[test]
    fn test_failed_create_returns_to_idle() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let CreatePlan::Create(op) = machine.begin_create(settings(4, "Duel"), Duration::from_secs(1), tx, false) else {
            panic!("expected a plain create");
        };
        assert!(machine.finish_create(op, false).is_some());
        assert_eq!(machine.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_second_request_rejected_while_pending() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        machine.begin_find(tx);

        assert!(matches!(
            machine.admit(Phase::Creating),
            Err(CoordinatorError::AlreadyInProgress(Phase::Finding))
        ));
        assert!(matches!(
            machine.admit(Phase::Finding),
            Err(CoordinatorError::AlreadyInProgress(Phase::Finding))
        ));
    }

    #[test]
    fn test_join_while_joining_is_already_in_session() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        machine.begin_join(tx);

        assert!(matches!(
            machine.admit(Phase::Joining),
            Err(CoordinatorError::Join(JoinError::AlreadyInSession))
        ));
    }

    #[test]
    fn test_create_while_created_queues_recreate() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let CreatePlan::Create(first) = machine.begin_create(settings(2, "Duel"), Duration::from_secs(1), tx, false) else {
            panic!("expected a plain create");
        };
        machine.finish_create(first, true);

        let (tx, _rx2) = reply();
        let plan = machine.begin_create(settings(8, "Deathmatch"), Duration::from_secs(1), tx, true);
        let CreatePlan::DestroyFirst(destroy_op) = plan else {
            panic!("expected destroy first");
        };
        assert_eq!(machine.state(), LifecycleState::Destroying);

        let done = machine.finish_destroy(destroy_op, true, false).unwrap();
        assert!(done.reply.is_none());
        assert_eq!(machine.state(), LifecycleState::Idle);

        let Some(Continuation::Recreate { settings, reply, .. }) = done.continuation else {
            panic!("continuation lost");
        };
        assert_eq!(settings.max_public_connections, 8);
        assert_eq!(settings.match_type, "Deathmatch");

        let op = machine.resume_create(reply);
        assert_eq!(machine.state(), LifecycleState::Creating);
        assert!(machine.finish_create(op, true).is_some());
        assert_eq!(machine.state(), LifecycleState::Created);
    }

    #[test]
    fn test_failed_destroy_keeps_session() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let op = machine.begin_destroy(tx);
        machine.finish_destroy(op, false, true).unwrap();
        assert_eq!(machine.state(), LifecycleState::Created);
    }

    #[test]
    fn test_find_resumes_prior_state() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let CreatePlan::Create(create) = machine.begin_create(settings(4, "Duel"), Duration::from_secs(1), tx, false) else {
            panic!("expected a plain create");
        };
        machine.finish_create(create, true);

        let (tx, _rx) = reply();
        let op = machine.begin_find(tx);
        assert_eq!(machine.state(), LifecycleState::Finding);
        assert!(machine.finish_find(op).is_some());
        assert_eq!(machine.state(), LifecycleState::Created);
    }

    #[test]
    fn test_join_failure_resumes_and_success_creates() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let op = machine.begin_join(tx);
        machine.finish_join(op, false).unwrap();
        assert_eq!(machine.state(), LifecycleState::Idle);

        let (tx, _rx) = reply();
        let op = machine.begin_join(tx);
        machine.finish_join(op, true).unwrap();
        assert_eq!(machine.state(), LifecycleState::Created);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut machine = Machine::new();
        let (tx, _rx) = reply();
        let op = machine.begin_find(tx);

        assert!(machine.finish_create(op, true).is_none());
        assert!(machine.finish_find(op + 1).is_none());
        assert_eq!(machine.state(), LifecycleState::Finding);
        assert!(machine.finish_find(op).is_some());
        // Delivered at most once
        assert!(machine.finish_find(op).is_none());
    }

    #[test]
    fn test_shutdown_rejects_everything() {
        let mut machine = Machine::new();
        let (tx, mut rx) = reply::<SearchOutcome>();
        let op = machine.begin_find(tx);

        let abandoned = machine.shut_down(true);
        assert_eq!(abandoned.phase(), Some(Phase::Finding));
        assert_eq!(machine.state(), LifecycleState::Destroying);
        drop(abandoned);
        assert!(rx.try_recv().is_err());

        assert!(!machine.is_current(op));
        assert!(matches!(machine.admit(Phase::Creating), Err(CoordinatorError::ShutDown)));
        machine.settle_idle();
        assert_eq!(machine.state(), LifecycleState::Idle);
    }
}
