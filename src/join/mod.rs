//! Join Module
//!
//! Transport seam, travel hand-off and the join coordinator.

pub mod coordinator;
pub mod transport;

pub use coordinator::{JoinCoordinator, JoinPolicy};
pub use transport::{HandshakeTarget, LoopbackTransport, NoTravel, Transport, TravelHandler};
