//! In-process block job queue with delayed delivery.

use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    IndexBlock,
    WaitNextBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub run: u64,
    pub hash: BlockHash,
    /// Unix milliseconds at creation.
    pub timestamp: u64,
}

impl Job {
    pub fn index_block(run: u64, hash: BlockHash) -> Self {
        Self::new(JobKind::IndexBlock, run, hash)
    }

    pub fn wait_next_block(run: u64, hash: BlockHash) -> Self {
        Self::new(JobKind::WaitNextBlock, run, hash)
    }

    fn new(kind: JobKind, run: u64, hash: BlockHash) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self {
            kind,
            run,
            hash,
            timestamp,
        }
    }

    pub fn name(&self) -> String {
        match self.kind {
            JobKind::IndexBlock => format!("block:{}", self.hash),
            JobKind::WaitNextBlock => format!("wait-next-block:{}", self.hash),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

pub trait Scheduler {
    /// Enqueues `job`, delivered after `delay` when one is given.
    fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), QueueError>;
    /// Stops accepting and delivering jobs.
    fn close(&self);
}

struct Shared {
    sender: mpsc::UnboundedSender<Job>,
    delayed: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Handles stay tracked after a panic elsewhere poisoned the lock, so
    /// `drain` and `close` can still abort them.
    fn delayed(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.delayed.lock().unwrap_or_else(|poisoned| {
            log::warn!("delayed job list was poisoned, recovering it");
            poisoned.into_inner()
        })
    }

    fn abort_delayed(&self) -> usize {
        let mut delayed = self.delayed();
        let pending = delayed.iter().filter(|handle| !handle.is_finished()).count();
        delayed.drain(..).for_each(|handle| handle.abort());
        pending
    }
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct BlockQueue {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the single worker.
pub struct JobReceiver {
    receiver: mpsc::UnboundedReceiver<Job>,
    shared: Arc<Shared>,
}

impl BlockQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            sender,
            delayed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (
            Self {
                shared: shared.clone(),
            },
            JobReceiver { receiver, shared },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Scheduler for BlockQueue {
    fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let Some(delay) = delay else {
            return self.shared.sender.send(job).map_err(|_| QueueError::Closed);
        };

        let sender = self.shared.sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(job);
        });
        let mut delayed = self.shared.delayed();
        delayed.retain(|handle| !handle.is_finished());
        delayed.push(handle);
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.abort_delayed();
    }
}

impl JobReceiver {
    /// Next job, or `None` once the queue is closed.
    pub async fn next(&mut self) -> Option<Job> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.receiver.recv().await
    }

    /// Discards every waiting and delayed job. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = self.shared.abort_delayed();
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    #[tokio::test]
    async fn test_immediate_jobs_arrive_in_order() {
        let (queue, mut receiver) = BlockQueue::new();
        queue.schedule(Job::index_block(1, hash(1)), None).unwrap();
        queue.schedule(Job::wait_next_block(1, hash(2)), None).unwrap();

        let first = receiver.next().await.unwrap();
        assert_eq!(first.kind, JobKind::IndexBlock);
        assert_eq!(first.hash, hash(1));
        assert_eq!(receiver.next().await.unwrap().kind, JobKind::WaitNextBlock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_waits() {
        let (queue, mut receiver) = BlockQueue::new();
        queue
            .schedule(Job::wait_next_block(1, hash(1)), Some(Duration::from_secs(30)))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(receiver.receiver.try_recv().is_err());

        let job = receiver.next().await.unwrap();
        assert_eq!(job.name(), format!("wait-next-block:{}", hash(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_drops_pending_and_delayed() {
        let (queue, mut receiver) = BlockQueue::new();
        queue.schedule(Job::index_block(1, hash(1)), None).unwrap();
        queue
            .schedule(Job::index_block(1, hash(2)), Some(Duration::from_secs(5)))
            .unwrap();

        assert_eq!(receiver.drain(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(receiver.receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_delayed_jobs_after_lock_poisoning() {
        let (queue, mut receiver) = BlockQueue::new();
        let shared = queue.shared.clone();
        let poisoner = std::thread::spawn(move || {
            let _delayed = shared.delayed.lock().unwrap();
            panic!("worker died holding the delayed list");
        });
        assert!(poisoner.join().is_err());
        assert!(queue.shared.delayed.is_poisoned());

        queue
            .schedule(Job::index_block(1, hash(2)), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(receiver.drain(), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(receiver.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_refuses_jobs() {
        let (queue, mut receiver) = BlockQueue::new();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.schedule(Job::index_block(1, hash(1)), None),
            Err(QueueError::Closed)
        ));
        assert!(receiver.next().await.is_none());
    }

    #[test]
    fn test_job_serializes_kind_as_type() {
        let job = Job::index_block(4, hash(3));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "index-block");
        assert_eq!(json["run"], 4);
    }
}
