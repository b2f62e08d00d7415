//! # Adapters Module
//!
//! Contains adapter implementations for the Block Archive subsystem.
//!
//! ## Modules
//!
//! - `index`: Archive index persistence (file-backed, in-memory)
//! - `repository`: `object_store` access to the shared remote repository
//! - `transfer`: Segment upload with validation and de-duplication
//! - `bridge`: Cluster bus notifications and remote read-through
//! - `verifier`: Ed25519 signature policy

pub mod bridge;
pub mod index;
pub mod repository;
pub mod transfer;
pub mod verifier;

pub use bridge::BusNotificationBridge;
pub use index::{FileArchiveIndex, InMemoryArchiveIndex};
pub use repository::RemoteRepository;
pub use transfer::ObjectStoreTransfer;
pub use verifier::Ed25519PolicyVerifier;
