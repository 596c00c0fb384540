//! Sequential block walk.
//!
//! One job is processed at a time. Each job is fenced by the `run` it was
//! scheduled under, so jobs left over from an earlier process lifetime are
//! dropped without touching the store.

use crate::checksum;
use crate::envelope;
use crate::error::{IndexerError, Result};
use crate::queue::{Job, JobKind, JobReceiver, Scheduler};
use crate::rpc::NodeClient;
use crate::store::{ChecksumRecord, State, Store};
use crate::transfers;
use crate::verifier::Verifier;
use bitcoin::BlockHash;
use brc721_support::rpc::Block;
use std::time::{Duration, Instant};

/// Blocks kept behind the tip as the resume point after a reorg.
pub const FALLBACK_DEPTH: u64 = 20;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Indexed {
        height: u64,
        hash: BlockHash,
        next: Option<BlockHash>,
    },
    Polled {
        next: Option<BlockHash>,
    },
    StaleRun,
}

pub struct Indexer<N, S, Q> {
    node: N,
    store: S,
    scheduler: Q,
    poll_interval: Duration,
}

impl<N: NodeClient, S: Store, Q: Scheduler> Indexer<N, S, Q> {
    pub fn new(node: N, store: S, scheduler: Q) -> Self {
        Self {
            node,
            store,
            scheduler,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn scheduler(&self) -> &Q {
        &self.scheduler
    }

    pub async fn process(&mut self, job: &Job) -> Result<JobOutcome> {
        let state = self.store.state()?.ok_or(IndexerError::MissingState)?;
        if state.run != job.run {
            log::warn!(
                "skipping {} from run {} (current run {})",
                job.name(),
                job.run,
                state.run
            );
            return Ok(JobOutcome::StaleRun);
        }

        match job.kind {
            JobKind::IndexBlock => self.index_block(job, state).await,
            JobKind::WaitNextBlock => self.wait_next_block(job, state).await,
        }
    }

    /// Processes jobs until the queue closes. A failing job closes the queue
    /// and its error is returned.
    pub async fn run(&mut self, receiver: &mut JobReceiver) -> Result<()> {
        while let Some(job) = receiver.next().await {
            if let Err(err) = self.process(&job).await {
                log::error!("UNHANDLED ERROR in {}: {err}", job.name());
                self.scheduler.close();
                return Err(err);
            }
        }
        Ok(())
    }

    async fn index_block(&mut self, job: &Job, state: State) -> Result<JobOutcome> {
        let started = Instant::now();
        let block = self.fetch_block(job.hash, state.fallback_height).await?;

        let inscriptions = envelope::find_inscriptions_in_block(&block);
        Verifier::new(&mut self.store).verify_all(&inscriptions)?;

        let mut block_transfers = Vec::new();
        for tx in &block.tx {
            let found = transfers::find_transfers(&self.store, tx)?;
            transfers::apply_transfers(&mut self.store, &found, block.height)?;
            block_transfers.extend(found);
        }

        let block_checksum = checksum::block_checksum(&inscriptions, &block_transfers)?;
        self.store.put_checksum(ChecksumRecord {
            block_height: block.height,
            block_hash: block.hash,
            checksum: block_checksum.clone(),
        })?;
        self.store.put_state(State {
            run: state.run,
            hash: block.hash,
            height: block.height,
            fallback_height: block.height.saturating_sub(FALLBACK_DEPTH),
            checksum: checksum::chain(&state.checksum, &block_checksum),
        })?;
        self.store.commit()?;

        log::info!(
            "indexed block {} ({}): {} inscriptions, {} transfers in {}ms",
            block.height,
            block.hash,
            inscriptions.len(),
            block_transfers.len(),
            started.elapsed().as_millis()
        );

        let next = match block.next_block_hash {
            Some(next) => Job::index_block(state.run, next),
            None => Job::wait_next_block(state.run, block.hash),
        };
        self.scheduler.schedule(next, None)?;

        Ok(JobOutcome::Indexed {
            height: block.height,
            hash: block.hash,
            next: block.next_block_hash,
        })
    }

    async fn wait_next_block(&mut self, job: &Job, state: State) -> Result<JobOutcome> {
        let block = self.fetch_block(job.hash, state.fallback_height).await?;
        match block.next_block_hash {
            Some(next) => {
                log::debug!("block {} has a successor {next}", block.height);
                self.scheduler.schedule(Job::index_block(state.run, next), None)?;
            }
            None => {
                self.scheduler.schedule(
                    Job::wait_next_block(state.run, job.hash),
                    Some(self.poll_interval),
                )?;
            }
        }
        Ok(JobOutcome::Polled {
            next: block.next_block_hash,
        })
    }

    /// Fetches `hash`, stepping back to `fallback_height` (and further, in
    /// `FALLBACK_DEPTH` strides) while the node reports the block unknown.
    async fn fetch_block(&self, hash: BlockHash, fallback_height: u64) -> Result<Block> {
        let mut hash = hash;
        let mut fallback_height = fallback_height;
        loop {
            match self.node.get_block(&hash).await {
                Ok(block) => return Ok(block),
                Err(err) if err.is_block_not_found() && fallback_height > 0 => {
                    log::warn!("block {hash} not found, falling back to height {fallback_height}");
                    hash = self.node.get_block_hash(fallback_height).await?;
                    fallback_height = fallback_height.saturating_sub(FALLBACK_DEPTH);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Prepares the store and queue for a new process lifetime: stale jobs are
/// dropped, `run` is bumped and one job is seeded from the stored state.
/// With `reindex`, every manifest is flagged and the walk restarts at
/// `initial`.
pub fn bootstrap<S: Store + ?Sized, Q: Scheduler + ?Sized>(
    store: &mut S,
    scheduler: &Q,
    receiver: &mut JobReceiver,
    initial: State,
    reindex: bool,
) -> Result<State> {
    let dropped = receiver.drain();
    if dropped > 0 {
        log::info!("dropped {dropped} queued jobs from a previous run");
    }

    let mut state = store.begin_run(initial.clone())?;
    if reindex {
        store.mark_reindexing()?;
        state = State {
            run: state.run,
            ..initial
        };
        store.put_state(state.clone())?;
        log::info!("reindexing from block {} ({})", state.height, state.hash);
    }
    store.commit()?;

    // A block already folded into the checksum is not indexed twice; the walk
    // resumes from its successor.
    let indexed = !reindex
        && store
            .checksum(state.height)?
            .is_some_and(|record| record.block_hash == state.hash);
    let job = if indexed {
        Job::wait_next_block(state.run, state.hash)
    } else {
        Job::index_block(state.run, state.hash)
    };
    scheduler.schedule(job, None)?;
    log::info!(
        "run {} starting after block {} ({})",
        state.run,
        state.height,
        state.hash
    );
    Ok(state)
}
