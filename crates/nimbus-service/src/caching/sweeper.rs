use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CacheName;

/// Keeps a background sweeper alive.
///
/// The sweeper is aborted once this handle is dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Returns `true` once the sweeper has stopped, e.g. because its store was dropped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a task which calls `purge` every `period`.
///
/// `purge` returns the number of evicted entries, or `None` to stop the sweeper.
pub(super) fn spawn_sweeper<F>(name: CacheName, period: Duration, mut purge: F) -> SweeperHandle
where
    F: FnMut() -> Option<usize> + Send + 'static,
{
    let task = async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match purge() {
                Some(0) => {}
                Some(evicted) => {
                    tracing::trace!("Evicted {} expired entries from {} cache", evicted, name);
                    metric!(
                        counter("caches.sweep.evicted") += evicted as i64,
                        "cache" => name.as_ref()
                    );
                }
                None => break,
            }
        }
        tracing::debug!("Stopping {} cache sweeper", name);
    };

    SweeperHandle {
        handle: tokio::spawn(task),
    }
}
