// Session matchmaking coordinator
//
// Hosts, discovers, joins and tears down multiplayer game sessions through
// pluggable directory and transport backends.

// Declare modules
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod join;
pub mod lifecycle;
pub mod session;

pub use config::{CoordinatorConfig, Locality};
pub use directory::{DirectoryService, InMemoryDirectory};
pub use discovery::{SearchOutcome, SearchQuery, SearchResult, SearchResults};
pub use error::{CoordinatorError, JoinError, Result};
pub use join::{LoopbackTransport, Transport, TravelHandler};
pub use lifecycle::{Completion, LifecycleState, SessionCoordinator};
pub use session::{ConnectionInfo, CoordinatorEvent, HostSettings, SessionDescriptor, SessionId};
