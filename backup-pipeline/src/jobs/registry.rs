//! Job tracking plus the single-slot guard shared by backups and restores.

use crate::models::{new_job_id, Job, JobKind};
use crate::utils::{BackupError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Finished jobs kept for `get`/`list`; the running job is never evicted.
pub const MAX_JOB_HISTORY: usize = 100;

#[derive(Default)]
struct Slot {
    active: Option<String>,
    history: VecDeque<String>,
}

/// Tracks backup/restore jobs; at most one may hold the slot at a time.
pub struct JobRegistry {
    jobs: DashMap<String, Job>,
    slot: Mutex<Slot>,
    capacity: usize,
}

impl JobRegistry {
    /// Registry keeping the default number of finished jobs.
    pub fn new() -> Self {
        Self::with_capacity(MAX_JOB_HISTORY)
    }

    /// Registry keeping at most `capacity` jobs (at least one); the oldest
    /// finished jobs are dropped first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            slot: Mutex::new(Slot::default()),
            capacity: capacity.max(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot and register a new queued job in one step.
    ///
    /// The returned guard releases the slot when dropped.
    pub fn try_acquire(self: &Arc<Self>, kind: JobKind, now: DateTime<Utc>) -> Result<SlotGuard> {
        let mut slot = self.slot();
        if let Some(active) = &slot.active {
            return Err(BackupError::Concurrency(active.clone()));
        }

        let id = new_job_id(kind, now);
        self.jobs.insert(id.clone(), Job::new(id.clone(), kind, now));
        slot.active = Some(id.clone());
        slot.history.push_back(id.clone());
        self.evict(&mut slot);

        tracing::debug!(job_id = %id, %kind, "Job slot acquired");
        Ok(SlotGuard {
            registry: Arc::clone(self),
            job_id: id,
        })
    }

    fn evict(&self, slot: &mut Slot) {
        while slot.history.len() > self.capacity {
            let position = slot.history.iter().position(|id| {
                slot.active.as_deref() != Some(id.as_str())
                    && self.jobs.get(id).map_or(true, |job| job.status.is_terminal())
            });
            match position {
                Some(i) => {
                    if let Some(id) = slot.history.remove(i) {
                        self.jobs.remove(&id);
                    }
                }
                None => break,
            }
        }
    }

    /// Free the slot if `job_id` holds it. Returns whether it did.
    pub fn release(&self, job_id: &str) -> bool {
        let mut slot = self.slot();
        if slot.active.as_deref() == Some(job_id) {
            slot.active = None;
            tracing::debug!(job_id = %job_id, "Job slot released");
            true
        } else {
            false
        }
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    /// All tracked jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    /// The job currently holding the slot.
    pub fn active(&self) -> Option<Job> {
        let id = self.slot().active.clone()?;
        self.get(&id)
    }

    /// Apply `f` to the job under its entry lock. `None` if the id is unknown.
    pub fn update<R>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.jobs.get_mut(job_id).map(|mut job| f(&mut job))
    }

    /// Mark a job failed and free its slot regardless of what the pipeline is doing.
    pub fn force_fail(&self, job_id: &str, reason: &str, now: DateTime<Utc>) -> bool {
        let failed = self.update(job_id, |job| job.fail(reason, now)).unwrap_or(false);
        self.release(job_id);
        failed
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of the job slot.
pub struct SlotGuard {
    registry: Arc<JobRegistry>,
    job_id: String,
}

impl SlotGuard {
    /// Id of the job that owns the slot.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.release(&self.job_id);
    }
}
