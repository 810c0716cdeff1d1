//! Dispatch errors and the sink they are reported to.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::KeyError;

/// Conditions the dispatch layer reports instead of enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("error decoding object, invalid type")]
    InvalidObject,
    #[error("error decoding object tombstone, invalid type")]
    InvalidTombstone,
    #[error("couldn't get key for object: {0}")]
    Key(#[from] KeyError),
    #[error("owner kind {0:?} is not a Rollout or an Experiment")]
    UnknownOwnerKind(String),
}

impl DispatchError {
    /// Variant name; bounded, so usable as a metric label.
    pub const fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidObject => "InvalidObject",
            DispatchError::InvalidTombstone => "InvalidTombstone",
            DispatchError::Key(_) => "Key",
            DispatchError::UnknownOwnerKind(_) => "UnknownOwnerKind",
        }
    }
}

pub type ErrorHandler = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Ordered list of error handlers, built at startup and handed to every
/// enqueuer and resolver.
///
/// Every report is logged, then passed to each handler in registration order.
#[derive(Clone, Default)]
pub struct ErrorSink {
    handlers: Vec<ErrorHandler>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: impl Fn(&DispatchError) + Send + Sync + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn report(&self, err: DispatchError) {
        error!(error = %err, "dispatch error");
        for h in &self.handlers {
            h(&err);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").field("handlers", &self.handlers.len()).finish()
    }
}
