//! Directory Module
//!
//! The directory-service seam, its in-memory implementation and the
//! advertisement manager that publishes the hosted session.

pub mod advertisement;
pub mod memory;
pub mod service;

pub use advertisement::AdvertisementManager;
pub use memory::InMemoryDirectory;
pub use service::{AdvertisementHandle, ConnectionToken, DirectoryEntry, DirectoryService};
