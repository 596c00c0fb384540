use brc721_indexer::queue::{Job, QueueError, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scheduler that records jobs instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<(Job, Option<Duration>)>>,
    closed: AtomicBool,
}

impl RecordingScheduler {
    pub fn jobs(&self) -> Vec<(Job, Option<Duration>)> {
        self.jobs.lock().unwrap().clone()
    }

    /// Removes and returns every recorded job.
    pub fn take(&self) -> Vec<(Job, Option<Duration>)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    pub fn last(&self) -> Option<(Job, Option<Duration>)> {
        self.jobs.lock().unwrap().last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.jobs.lock().unwrap().push((job, delay));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
