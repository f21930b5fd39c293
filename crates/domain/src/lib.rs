//! Shared types for the voice relay: errors, ids, configuration, and the
//! trait boundaries to the external collaborators (persistence, pronunciation
//! assessment, event bus) assumed by the relay's specification.

pub mod assessor;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod persistence;

pub use error::{Error, Result};
