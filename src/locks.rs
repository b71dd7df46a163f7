use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum LockError {
    Busy { period_id: String, waited: Duration },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Busy { period_id, waited } => write!(
                f,
                "period '{}' is busy; gave up after {} ms",
                period_id,
                waited.as_millis()
            ),
        }
    }
}

impl std::error::Error for LockError {}

/// Registry of periods currently being mutated in this process. Mutations
/// on the same period queue up; different periods never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct PeriodLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug)]
pub struct PeriodLock {
    period_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl PeriodLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, period_id: &str, timeout: Duration) -> Result<PeriodLock, LockError> {
        let start = Instant::now();
        let mut contended = false;
        loop {
            match self.try_acquire(period_id) {
                Some(guard) => {
                    if contended {
                        tracing::debug!(
                            period_id,
                            waited_ms = start.elapsed().as_millis() as u64,
                            "period lock acquired after contention"
                        );
                    }
                    return Ok(guard);
                }
                None if start.elapsed() >= timeout => {
                    tracing::warn!(period_id, "period lock acquisition timed out");
                    return Err(LockError::Busy {
                        period_id: period_id.to_string(),
                        waited: start.elapsed(),
                    });
                }
                None => {
                    contended = true;
                    thread::sleep(Duration::from_millis(2));
                }
            }
        }
    }

    pub fn try_acquire(&self, period_id: &str) -> Option<PeriodLock> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(period_id.to_string()) {
            return None;
        }
        Some(PeriodLock {
            period_id: period_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }
}

impl Drop for PeriodLock {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.period_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::PeriodLocks;

    #[test]
    fn try_lock_is_non_blocking() {
        let locks = PeriodLocks::new();
        let first = locks.try_acquire("P-1").expect("initial lock should succeed");
        assert!(locks.try_acquire("P-1").is_none());
        drop(first);
        assert!(locks.try_acquire("P-1").is_some());
    }

    #[test]
    fn distinct_periods_do_not_contend() {
        let locks = PeriodLocks::new();
        let _first = locks.try_acquire("P-1").expect("lock P-1");
        assert!(locks.try_acquire("P-2").is_some());
    }

    #[test]
    fn acquire_times_out_when_held() {
        let locks = PeriodLocks::new();
        let _first = locks.try_acquire("P-1").expect("lock P-1");
        let err = locks
            .acquire("P-1", Duration::from_millis(20))
            .expect_err("lock should time out when already held");
        assert!(err.to_string().contains("is busy"));
    }

    #[test]
    fn clones_share_the_same_registry() {
        let locks = PeriodLocks::new();
        let other = locks.clone();
        let _first = locks.try_acquire("P-1").expect("lock P-1");
        assert!(other.try_acquire("P-1").is_none());
    }
}
