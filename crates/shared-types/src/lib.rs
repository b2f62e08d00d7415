//! # Shared Types Crate
//!
//! Ledger entities shared by the block store, the archiving subsystem and the
//! cluster messaging fabric.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the block model is defined once, here.
//! - **Opaque on disk**: storage frames the bincode encoding of a [`Block`]
//!   and never interprets it.

pub mod entities;

pub use entities::*;
