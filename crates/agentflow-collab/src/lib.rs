//! Collaboration layer for Agentflow.
//!
//! The [`TeamCoordinator`] delivers messages between registered agents and
//! groups them into collaboration sessions. Failures here never abort a
//! workflow: messages involving unknown agents are simply not delivered.

/// The team coordinator.
pub mod coordinator;
/// Message and session types.
pub mod message;

pub use coordinator::{SessionId, TeamCoordinator, DEFAULT_INBOX_CAPACITY};
pub use message::{CollaborationMessage, CollaborationSession, MessageType, TeamStats};
