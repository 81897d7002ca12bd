//! Router and receptor error types

use crate::ReceptorId;
use semantic_types::TypeError;
use thiserror::Error;

/// Errors surfaced by router and membrane operations
#[derive(Error, Debug)]
pub enum RouterError {
    /// Registry rejected a lookup or a payload; never swallowed by the router
    #[error("Registry error: {0}")]
    Registry(#[from] TypeError),

    #[error("Unknown receptor: {0}")]
    UnknownReceptor(ReceptorId),

    #[error("No receptor factory registered for '{0}'")]
    UnknownFactory(String),

    #[error("Router '{0}' is shut down")]
    Closed(String),

    #[error("Membrane '{0}' is dissolved")]
    Dissolved(String),

    #[error("Unknown membrane: {0}")]
    UnknownMembrane(String),

    #[error("Membrane '{0}' already exists")]
    DuplicateMembrane(String),
}

/// Failures returned by receptor handlers
#[derive(Error, Debug)]
pub enum ReceptorError {
    #[error("{0}")]
    Failed(String),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReceptorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
pub type ReceptorResult<T = ()> = Result<T, ReceptorError>;
