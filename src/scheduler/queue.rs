use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::scheduler::job::{Job, JobSpec, JobStatus};

pub const DEFAULT_MAX_JOBS: usize = 10_000;

/// Bounded in-memory job table with FIFO ordering by creation sequence.
#[derive(Debug)]
pub struct JobQueue {
    jobs: HashMap<Uuid, Job>,
    next_seq: u64,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            next_seq: 0,
            max_jobs,
        }
    }

    /// Create a QUEUED job. Returns None if the queue is at capacity.
    pub fn add_job(&mut self, spec: JobSpec, created_at: DateTime<Utc>) -> Option<Job> {
        if self.is_full() {
            return None;
        }
        let job = Job::new(spec, self.next_seq, created_at);
        self.next_seq += 1;
        self.jobs.insert(job.id, job.clone());
        Some(job)
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_job_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Oldest queued jobs first, at most `limit`.
    pub fn queued_jobs(&self, limit: usize) -> Vec<&Job> {
        let mut queued: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        queued.sort_by_key(|j| (j.created_at, j.seq));
        queued.truncate(limit);
        queued
    }

    /// All jobs in creation order.
    pub fn all_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| (j.created_at, j.seq));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
