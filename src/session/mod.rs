//! Session Module
//!
//! Session descriptors, the single-writer session registry and the
//! caller-facing event stream.

pub mod descriptor;
pub mod events;
pub mod registry;

pub use descriptor::{ConnectionInfo, HostSettings, SessionDescriptor, SessionId, Visibility, MATCH_TYPE_KEY};
pub use events::{CoordinatorEvent, EventEmitter, JoinResultCode};
pub use registry::{RegistryChange, RegistryError, SessionRegistry};
