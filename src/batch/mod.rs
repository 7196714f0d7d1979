pub mod sink;

use crate::models::{timestamp_now, CheckpointStore, PriceRecord};
use crate::scrapers::types::{is_rate_limited, UnusableResponse};
use crate::scrapers::PriceFetcher;
use crate::storage::{self, DocumentError};
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use sink::WebhookSink;

/// Where progress goes and how the loop paces itself
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Rewritten after every item; removed once the batch completes
    pub checkpoint_path: PathBuf,
    /// Written once, after the last item
    pub final_path: PathBuf,
    /// Jitter drawn uniformly from `[min, max]` before each fetch
    pub delay_range: (Duration, Duration),
    /// Extra pause after a failure that looks like throttling
    pub error_backoff: Duration,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counts for one pass over the item list
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Sequential, resumable price lookup over a fixed item list.
///
/// Running two of these against the same checkpoint path at once is not
/// supported; nothing guards against it.
pub struct BatchFetcher {
    fetcher: Box<dyn PriceFetcher>,
    settings: BatchSettings,
}

impl BatchFetcher {
    pub fn new(fetcher: Box<dyn PriceFetcher>, settings: BatchSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Load whatever a previous, interrupted run left behind
    pub async fn resume(&self) -> CheckpointStore {
        load_checkpoint(&self.settings.checkpoint_path).await
    }

    /// Resume from the checkpoint and process every item
    pub async fn run(&self, items: &[String]) -> Result<(CheckpointStore, BatchReport), BatchError> {
        let mut store = self.resume().await;
        let report = self.process_all(items, &mut store).await?;
        Ok((store, report))
    }

    /// Fetch every item not yet in `store`, persisting after each one.
    ///
    /// A failing item is recorded as an error record and the loop moves on.
    /// Only a checkpoint or final write that fails twice stops the batch.
    pub async fn process_all(
        &self,
        items: &[String],
        store: &mut CheckpointStore,
    ) -> Result<BatchReport, BatchError> {
        let mut report = BatchReport::default();
        let source = self.fetcher.source_name();

        for item in items {
            if store.contains(item) {
                info!("Already processed: {}", item);
                report.skipped += 1;
                continue;
            }

            let wait = jitter(self.settings.delay_range);
            info!("Waiting {:.1}s before fetching '{}'...", wait.as_secs_f64(), item);
            tokio::time::sleep(wait).await;

            info!("🔎 Fetching prices for '{}' via {}", item, source);
            let outcome = self.fetcher.fetch_prices(item).await;

            let throttled = match outcome {
                Ok(prices) => {
                    let found = prices.values().filter(|p| p.is_some()).count();
                    store.insert(item.clone(), PriceRecord::found(prices, timestamp_now()));
                    report.fetched += 1;
                    info!("✅ '{}': found on {} store(s)", item, found);
                    false
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    let raw = e.downcast_ref::<UnusableResponse>().map(|u| u.raw.clone());
                    warn!("❌ '{}' failed: {}", item, message);
                    let throttled = is_rate_limited(&message);
                    store.insert(item.clone(), PriceRecord::failed(message, raw, timestamp_now()));
                    report.failed += 1;
                    throttled
                }
            };

            persist(&self.settings.checkpoint_path, store).await?;
            debug!(
                "Checkpoint saved to {} ({} items)",
                self.settings.checkpoint_path.display(),
                store.len()
            );

            if throttled {
                warn!(
                    "Rate limit detected, backing off for {}s",
                    self.settings.error_backoff.as_secs()
                );
                tokio::time::sleep(self.settings.error_backoff).await;
            }
        }

        persist(&self.settings.final_path, store).await?;
        info!(
            "💾 Saved {} items to {}",
            store.len(),
            self.settings.final_path.display()
        );

        match storage::remove_document(&self.settings.checkpoint_path).await {
            Ok(true) => debug!("Removed checkpoint {}", self.settings.checkpoint_path.display()),
            Ok(false) => {}
            // Final document is already on disk
            Err(e) => warn!(
                "Could not remove checkpoint {}: {}",
                self.settings.checkpoint_path.display(),
                e
            ),
        }

        Ok(report)
    }
}

/// Read a checkpoint, falling back to an empty store if it is absent or unreadable
pub async fn load_checkpoint(path: &Path) -> CheckpointStore {
    let value = match storage::read_document(path).await {
        Ok(value) => value,
        Err(DocumentError::Missing(_)) => {
            debug!("No checkpoint at {}, starting fresh", path.display());
            return CheckpointStore::new();
        }
        Err(e) => {
            warn!("Ignoring checkpoint: {}", e);
            return CheckpointStore::new();
        }
    };

    match serde_json::from_value::<CheckpointStore>(value) {
        Ok(store) => {
            info!(
                "Resuming from {}; already processed: {:?}",
                path.display(),
                store.items().collect::<Vec<_>>()
            );
            store
        }
        Err(e) => {
            warn!(
                "Ignoring checkpoint {}: not a price mapping ({})",
                path.display(),
                e
            );
            CheckpointStore::new()
        }
    }
}

/// Write the whole store, retrying once before giving up
async fn persist(path: &Path, store: &CheckpointStore) -> Result<(), BatchError> {
    if let Err(first) = storage::write_document(path, store).await {
        warn!("Failed to write {}: {}; retrying", path.display(), first);
        if let Err(source) = storage::write_document(path, store).await {
            error!("Giving up on {}: {}", path.display(), source);
            return Err(BatchError::Persistence {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(())
}

fn jitter((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}
