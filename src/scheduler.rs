//! Run orchestration
//!
//! One control flow owns the queue, the worker pool and the cache. Up to
//! N lanes (one per worker slot) are in flight at once as futures in a
//! `FuturesUnordered`; whenever one settles, its slot is released and the
//! next queued item takes the idle slot. Failed items go back to the tail
//! of the queue until they hit the retry ceiling.
//!
//! Each lane runs in two steps so the cache is only read from the control
//! flow: first the source digest is computed, then the control flow checks
//! the cache and launches either a compress + apply or an apply of the
//! cached artifact.

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::applier::ResultApplier;
use crate::asset::AssetItem;
use crate::cache::{relative_artifact_path, CacheStore};
use crate::compressor::Compressor;
use crate::hash;
use crate::profile::Profile;
use crate::worker::{WorkerPool, WorkerSlot};

/// Attempts allowed per item before it is given up on
pub const DEFAULT_RETRY_CEILING: u32 = 10;

/// Aggregate outcome of one run
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    /// Items handed to the scheduler
    pub total: usize,
    pub success_count: usize,
    /// Items that exhausted their retries (or can never succeed)
    pub failures: Vec<AssetItem>,
    /// Successes that reused a cached artifact
    pub cache_hits: usize,
    /// Compressor invocations, including failed ones
    pub compressions: usize,
}

impl RunReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Items that reached a final state
    pub fn settled(&self) -> usize {
        self.success_count + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.settled() == self.total
    }

    fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.success_count * 100 / self.total
        }
    }
}

/// Why an attempt failed
#[derive(Debug)]
struct Failure {
    reason: String,
    retryable: bool,
}

impl Failure {
    fn retryable(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            retryable: true,
        }
    }
}

/// Lane completions observed by the control flow
enum Event {
    Digested {
        item: AssetItem,
        slot: WorkerSlot,
        digest: anyhow::Result<String>,
    },
    Finished {
        item: AssetItem,
        slot: usize,
        digest: String,
        /// Set when the compressor produced a new artifact this attempt
        fresh_artifact: Option<PathBuf>,
        cache_hit: bool,
        result: Result<(), Failure>,
    },
}

/// Drives every item to success or terminal failure
pub struct Scheduler<C> {
    compressor: C,
    applier: ResultApplier,
    pool: WorkerPool,
    cache: CacheStore,
    profile: Profile,
    retry_ceiling: u32,
    progress: ProgressBar,
}

impl<C: Compressor> Scheduler<C> {
    pub fn new(
        compressor: C,
        pool: WorkerPool,
        cache: CacheStore,
        profile: Profile,
        retry_ceiling: u32,
    ) -> Self {
        Self {
            compressor,
            applier: ResultApplier::new(profile),
            pool,
            cache,
            profile,
            retry_ceiling: retry_ceiling.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    /// Report settled items on a progress bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn into_cache(self) -> CacheStore {
        self.cache
    }

    /// Process `items` until each one has succeeded or failed for good
    pub async fn run(&mut self, items: Vec<AssetItem>) -> RunReport {
        let Self {
            compressor,
            applier,
            pool,
            cache,
            profile,
            retry_ceiling,
            progress,
        } = self;
        let compressor = &*compressor;
        let applier = &*applier;
        let profile = *profile;
        let retry_ceiling = *retry_ceiling;

        let mut report = RunReport::new(items.len());
        let mut queue: VecDeque<AssetItem> = items.into();
        let mut in_flight: FuturesUnordered<LocalBoxFuture<'_, Event>> = FuturesUnordered::new();

        progress.set_length(report.total as u64);
        info!(
            "Processing {} images on {} workers ({})",
            report.total,
            pool.len(),
            profile
        );

        loop {
            // Fill every idle lane
            while let Some(slot_id) = pool.acquire_idle() {
                let Some(item) = queue.pop_front() else {
                    break;
                };
                let Some(slot) = pool.slot(slot_id).cloned() else {
                    break;
                };
                pool.mark_busy(slot_id);
                in_flight.push(digest_lane(item, slot));
            }

            if report.is_complete() {
                break;
            }

            let Some(event) = in_flight.next().await else {
                warn!(
                    "No work in flight with {} of {} items settled",
                    report.settled(),
                    report.total
                );
                break;
            };

            match event {
                Event::Digested {
                    item,
                    slot,
                    digest: Ok(digest),
                } => {
                    let cached = cache.lookup(profile, &digest);
                    if cached.is_none() {
                        report.compressions += 1;
                    }
                    in_flight.push(convert_lane(
                        compressor, applier, profile, item, slot, digest, cached,
                    ));
                }
                Event::Digested {
                    item,
                    slot,
                    digest: Err(e),
                } => {
                    pool.release(slot.id);
                    settle_failure(
                        item,
                        Failure::retryable(format!("{:#}", e)),
                        retry_ceiling,
                        &mut queue,
                        &mut report,
                    );
                }
                Event::Finished {
                    item,
                    slot,
                    digest,
                    fresh_artifact,
                    cache_hit,
                    result,
                } => {
                    pool.release(slot);

                    if let Some(artifact) = fresh_artifact {
                        let file_name = artifact
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        cache.record(profile, &digest, &relative_artifact_path(profile, &file_name));
                    }

                    match result {
                        Ok(()) => {
                            info!("Done: {}", item);
                            report.success_count += 1;
                            if cache_hit {
                                report.cache_hits += 1;
                            }
                        }
                        Err(failure) => {
                            settle_failure(item, failure, retry_ceiling, &mut queue, &mut report)
                        }
                    }
                }
            }

            progress.set_position(report.settled() as u64);
            info!(
                "Progress: {}% {}/{}",
                report.percent(),
                report.success_count,
                report.total
            );
        }

        progress.finish_and_clear();
        report
    }
}

/// First lane step: digest the untouched source file
fn digest_lane<'a>(item: AssetItem, slot: WorkerSlot) -> LocalBoxFuture<'a, Event> {
    async move {
        let digest = hash::compute_file_sha1_async(&item.path()).await;
        Event::Digested { item, slot, digest }
    }
    .boxed_local()
}

/// Second lane step: compress (unless cached), then apply
fn convert_lane<'a, C>(
    compressor: &'a C,
    applier: &'a ResultApplier,
    profile: Profile,
    item: AssetItem,
    slot: WorkerSlot,
    digest: String,
    cached: Option<PathBuf>,
) -> LocalBoxFuture<'a, Event>
where
    C: Compressor + 'a,
{
    async move {
        let cache_hit = cached.is_some();
        let (artifact, fresh_artifact) = match cached {
            Some(artifact) => {
                info!("Cache hit: {}", item);
                (artifact, None)
            }
            None => match compressor.compress(&item, &slot, profile).await {
                Ok(artifact) => (artifact.clone(), Some(artifact)),
                Err(e) => {
                    return Event::Finished {
                        item,
                        slot: slot.id,
                        digest,
                        fresh_artifact: None,
                        cache_hit,
                        result: Err(Failure::retryable(e)),
                    };
                }
            },
        };

        let result = applier
            .apply(&item, &artifact)
            .await
            .map(|_| ())
            .map_err(|e| Failure {
                retryable: e.is_retryable(),
                reason: e.to_string(),
            });

        Event::Finished {
            item,
            slot: slot.id,
            digest,
            fresh_artifact,
            cache_hit,
            result,
        }
    }
    .boxed_local()
}

/// Requeue at the tail, or give up once the ceiling is reached
fn settle_failure(
    mut item: AssetItem,
    failure: Failure,
    retry_ceiling: u32,
    queue: &mut VecDeque<AssetItem>,
    report: &mut RunReport,
) {
    item.retry_count += 1;

    if failure.retryable && item.retry_count < retry_ceiling {
        warn!(
            "Attempt {}/{} failed for {}: {}",
            item.retry_count, retry_ceiling, item, failure.reason
        );
        queue.push_back(item);
    } else {
        error!(
            "Giving up on {} after {} attempts: {}",
            item, item.retry_count, failure.reason
        );
        report.failures.push(item);
    }
}
