use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{OrgListError, OrgListResult};
use crate::org_list::OrgListSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheOutcome {
    Hit,
    Miss,
    Joined,
    /// The cache was invalidated while this load ran; the snapshot predates
    /// that change and was not stored.
    Stale,
}

#[derive(Debug, Clone)]
struct OrgListCacheEntry {
    created_at: Instant,
    snapshot: OrgListSnapshot,
}

#[derive(Debug)]
struct OrgListInFlight {
    generation: u64,
    result: Mutex<Option<Result<OrgListSnapshot, String>>>,
    cvar: Condvar,
}

impl OrgListInFlight {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            result: Mutex::new(None),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> OrgListResult<Result<OrgListSnapshot, String>> {
        let mut guard = self
            .result
            .lock()
            .map_err(|_| OrgListError::Poisoned("org list result"))?;
        while guard.is_none() {
            guard = self
                .cvar
                .wait(guard)
                .map_err(|_| OrgListError::Poisoned("org list result"))?;
        }
        Ok(guard
            .clone()
            .unwrap_or_else(|| Err("Org list load finished without a result.".to_string())))
    }

    fn publish(&self, result: Result<OrgListSnapshot, String>) {
        if let Ok(mut guard) = self.result.lock() {
            *guard = Some(result);
            self.cvar.notify_all();
        }
    }
}

/// Caches the last `sf org list` snapshot and collapses concurrent loads
/// into a single CLI invocation.
///
/// Every `invalidate()` starts a new generation. Loads that began in an
/// earlier generation are never stored and never joined by later callers.
#[derive(Debug, Default)]
pub struct OrgListCache {
    generation: AtomicU64,
    entry: Mutex<Option<OrgListCacheEntry>>,
    in_flight: Mutex<Option<Arc<OrgListInFlight>>>,
}

impl OrgListCache {
    pub fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.lock() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            entry.take();
        }
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn age(&self) -> Option<Duration> {
        let entry = self.entry.lock().ok()?;
        entry.as_ref().map(|cached| cached.created_at.elapsed())
    }

    fn fresh(&self, ttl: Duration) -> Option<OrgListSnapshot> {
        let entry = self.entry.lock().ok()?;
        let cached = entry.as_ref()?;
        if cached.created_at.elapsed() < ttl {
            Some(cached.snapshot.clone())
        } else {
            None
        }
    }

    /// Stores the snapshot unless the cache was invalidated after `generation`
    /// began. Checked under the entry lock so it cannot interleave with
    /// `invalidate()`.
    fn store(&self, generation: u64, snapshot: &OrgListSnapshot) -> bool {
        let Ok(mut entry) = self.entry.lock() else {
            return false;
        };
        if self.current_generation() != generation {
            return false;
        }
        *entry = Some(OrgListCacheEntry {
            created_at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        true
    }

    /// A forced load still joins a load that is already running in the
    /// current generation.
    pub fn get_or_load(
        &self,
        ttl: Duration,
        force: bool,
        load: impl FnOnce() -> OrgListResult<OrgListSnapshot>,
    ) -> OrgListResult<(OrgListSnapshot, CacheOutcome)> {
        if !force {
            if let Some(snapshot) = self.fresh(ttl) {
                return Ok((snapshot, CacheOutcome::Hit));
            }
        }

        let (cell, leader) = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| OrgListError::Poisoned("org list in-flight"))?;
            let generation = self.current_generation();
            match in_flight.as_ref() {
                Some(existing) if existing.generation == generation => (existing.clone(), false),
                _ => {
                    let cell = Arc::new(OrgListInFlight::new(generation));
                    *in_flight = Some(cell.clone());
                    (cell, true)
                }
            }
        };

        if !leader {
            let snapshot = cell.wait()?.map_err(OrgListError::Shared)?;
            let outcome = if self.current_generation() == cell.generation {
                CacheOutcome::Joined
            } else {
                CacheOutcome::Stale
            };
            return Ok((snapshot, outcome));
        }

        // Another leader may have finished between the freshness check and
        // taking the in-flight slot.
        let reused = if force { None } else { self.fresh(ttl) };
        let (loaded, mut outcome) = match reused {
            Some(snapshot) => (Ok(snapshot), CacheOutcome::Hit),
            None => (load(), CacheOutcome::Miss),
        };

        if let (Ok(snapshot), CacheOutcome::Miss) = (&loaded, outcome) {
            if !self.store(cell.generation, snapshot) {
                outcome = CacheOutcome::Stale;
            }
        }

        cell.publish(match &loaded {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(error) => Err(error.to_string()),
        });
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.take();
            }
        }

        loaded.map(|snapshot| (snapshot, outcome))
    }
}
