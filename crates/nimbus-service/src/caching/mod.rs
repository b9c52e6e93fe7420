//! # Nimbus caching infrastructure
//!
//! Upstream weather APIs are slow, rate limited and billed per request, so every request that
//! Nimbus sends upstream goes through a [`CoalescingStore`].
//!
//! ## Layers
//!
//! The store combines two tables behind a single mutex:
//!
//! - An entry table holding values together with their absolute expiration [`Instant`].
//!   Expired entries are never handed out: every read checks the deadline against the store's
//!   [`Clock`]. A background sweeper ([`CoalescingStore::spawn_sweeper`]) additionally purges
//!   expired entries so that keys which are never read again do not pile up.
//! - An in-flight table mapping keys to a shared handle of a running computation. This is what
//!   does request coalescing: concurrent [`CoalescingStore::get_or_fetch`] calls for the same key
//!   attach to the same computation instead of issuing their own upstream request.
//!
//! Deciding whether a caller is served from the cache, attaches to a running computation, or
//! becomes the "leader" which starts a new computation happens within one critical section. This
//! guarantees that there is at most one computation per key at any time, regardless of how many
//! threads hit the store.
//!
//! The leader's computation is spawned as its own task. Callers which give up waiting do not
//! cancel it, and all callers that attached to it observe the very same outcome.
//!
//! ## Errors
//!
//! [`CacheError::Producer`] wraps the failure of a computation. It is delivered to every caller
//! of that computation, but it is never cached: the next call starts a fresh computation.
//! [`CacheError::InvalidTtl`] is returned synchronously for misuse and affects nobody else.
//!
//! ## Metrics
//!
//! All metrics are tagged with a `cache` field corresponding to the [`CacheName`]:
//!
//! - `caches.access`: All lookups.
//! - `caches.memory.hit`: Lookups served from the entry table.
//! - `caches.channel.hit`: Lookups which attached to an already running computation.
//! - `caches.computation`: Actual computations being started.
//! - `caches.computation.failed`: Computations whose producer failed.
//! - `caches.sweep.evicted`: Expired entries removed by the sweeper.
//!
//! [`Instant`]: std::time::Instant

use std::fmt;

use serde::Serialize;

mod clock;
mod config;
mod error;
mod store;
mod sweeper;


pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::{CacheError, ProducerError};
pub use store::{CacheStats, CoalescingStore};
pub use sweeper::SweeperHandle;

/// All known cache names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheName {
    Current,
    Forecast,
    Hourly,
    Historical,
    Future,
    Search,
}

impl CacheName {
    /// All cache names, in the order in which they are reported.
    pub const ALL: [CacheName; 6] = [
        Self::Current,
        Self::Forecast,
        Self::Hourly,
        Self::Historical,
        Self::Future,
        Self::Search,
    ];
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Hourly => "hourly",
            Self::Historical => "historical",
            Self::Future => "future",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
