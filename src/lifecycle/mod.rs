//! Lifecycle Module
//!
//! The lifecycle state machine, per-call completions and the session
//! coordinator that drives them.

pub mod completion;
pub mod coordinator;
pub mod state;


pub use completion::{Abandoned, Completion};
pub use coordinator::{SessionCoordinator, SessionCoordinatorBuilder};
pub use state::{LifecycleState, Machine, PendingOperation, Phase};
