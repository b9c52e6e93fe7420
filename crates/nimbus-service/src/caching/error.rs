use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// The original failure of a cache computation.
///
/// This is transparent: it displays as the original error, and continues with its source. The
/// same failure is handed to every caller that waited on the computation, which is why it is
/// kept behind an [`Arc`].
#[derive(Clone)]
pub struct ProducerError(Arc<dyn Error + Send + Sync + 'static>);

impl ProducerError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self(Arc::from(err.into()))
    }

    /// Returns the original error if it is of type `E`.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns `true` if both errors are the very same failure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for ProducerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// An error returned by a [`CoalescingStore`](super::CoalescingStore).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The producer of a value failed.
    ///
    /// This is shared by all callers which were waiting on the same computation.
    #[error("failed to produce value")]
    Producer(#[source] ProducerError),
    /// The given time-to-live can not be used.
    ///
    /// A zero TTL would expire an entry before anybody could read it, and huge TTLs overflow the
    /// clock.
    #[error("invalid time-to-live: {0:?}")]
    InvalidTtl(Duration),
    /// The computation went away without producing a result.
    ///
    /// This happens if the runtime shuts down or the producer panics.
    #[error("computation was interrupted")]
    Interrupted,
}

impl CacheError {
    /// Returns the producer failure, if this is one.
    pub fn producer_error(&self) -> Option<&ProducerError> {
        match self {
            Self::Producer(err) => Some(err),
            _ => None,
        }
    }
}
