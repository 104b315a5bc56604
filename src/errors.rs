//! Typed error hierarchy for the ARV orchestrator.
//!
//! Two top-level enums cover the two layers:
//! - `StoreError`: persistence failures from a `Store` backend
//! - `SessionError`: session lifecycle failures surfaced by the orchestrator

use thiserror::Error;

use crate::session::models::{Collection, SessionStatus};

/// Errors from a `Store` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors from the session orchestrator and its gateways.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {id} is {actual}, expected {expected}")]
    InvalidState {
        id: String,
        expected: SessionStatus,
        actual: SessionStatus,
    },

    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Judge unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("Investment provider error: {0}")]
    InvestmentProvider(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Session {id} was modified concurrently")]
    Conflict { id: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("No images available: {0}")]
    ImagesUnavailable(String),
}

impl SessionError {
    /// A lost race against another transition. Never fatal, never worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::Conflict { .. })
    }

    /// The session stays in its current status and the next sweep retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::JudgeUnavailable(_) | Self::InvestmentProvider(_) | Self::Persistence(_)
        )
    }
}
