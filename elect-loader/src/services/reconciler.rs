//! Reconciliation of produced records against the store
//!
//! For each record, in order:
//! 1. cancellation check
//! 2. unknown-region policy
//! 3. unknown-commission policy
//! 4. duplicate detection (skipped while the provider has no stored protocols)
//! 5. attachment resolution
//! 6. persistence, one transaction per protocol
//! 7. counters and one status line
//!
//! Records are processed strictly one after another.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::error::{EntityKind, FetchError, ImportError};
use crate::models::{
    ImportCounters, ImportParameters, Protocol, ProtocolRecord, UnknownEntityAction, UpdatePolicy,
    CANDIDATE_VALUES,
};
use crate::services::fetcher::{AttachmentFetcher, ProgressSink};
use crate::services::image_cache::ImageCache;
use crate::services::resolver::RunContext;
use crate::services::run_log::RunLog;

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created { images: usize },
    Updated { images: usize },
    /// Changed duplicate left as stored
    ChangeKept,
    Unchanged,
    SkippedRegion,
    SkippedCommission,
}

enum Decision {
    Create,
    Replace(Uuid),
    Keep,
    Unchanged,
}

/// Per-run reconciliation engine
pub struct ReconciliationEngine {
    pool: SqlitePool,
    parameters: ImportParameters,
    fetcher: Option<Arc<dyn AttachmentFetcher>>,
    cache: Option<ImageCache>,
    sink: Arc<dyn ProgressSink>,
    log: RunLog,
    cancel: CancellationToken,
}

impl ReconciliationEngine {
    pub fn new(
        pool: SqlitePool,
        parameters: ImportParameters,
        sink: Arc<dyn ProgressSink>,
        log: RunLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            parameters,
            fetcher: None,
            cache: None,
            sink,
            log,
            cancel,
        }
    }

    /// Fetcher used for images that carry only a URI
    ///
    /// Only consulted when `download_images` is set.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Local cache checked before, and filled after, every image fetch
    pub fn with_image_cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Consume the record sequence until it ends, the run is cancelled or a
    /// run-fatal error occurs
    ///
    /// `counters` reflects every record handled before the run stopped.
    pub async fn run<I>(
        &self,
        ctx: &mut RunContext,
        mut records: I,
        counters: &mut ImportCounters,
    ) -> Result<(), ImportError>
    where
        I: Iterator<Item = Result<ProtocolRecord, ImportError>> + Send,
    {
        if ctx.poll.candidates.len() < CANDIDATE_VALUES {
            return Err(ImportError::Unhandled(anyhow::anyhow!(
                "Poll '{}' has {} candidates, records carry {} candidate values",
                ctx.poll.name,
                ctx.poll.candidates.len(),
                CANDIDATE_VALUES
            )));
        }

        loop {
            if self.cancel.is_cancelled() {
                self.log.warn("Import cancelled");
                return Err(ImportError::Cancelled);
            }

            let record = match records.next() {
                Some(record) => record?,
                None => break,
            };

            counters.total += 1;
            let seq = counters.total;
            let region = record.region.name.clone();
            let commission = record.commission;

            let outcome = self.process(ctx, record).await?;
            self.report(seq, &region, commission, outcome);

            match outcome {
                RecordOutcome::Created { .. } => counters.created += 1,
                RecordOutcome::Updated { .. } | RecordOutcome::ChangeKept => counters.updated += 1,
                RecordOutcome::Unchanged
                | RecordOutcome::SkippedRegion
                | RecordOutcome::SkippedCommission => counters.skipped += 1,
            }
        }

        self.log.info(format!(
            "All protocols loaded. Total: {}, new: {}, updated: {}, skipped: {}",
            counters.total, counters.created, counters.updated, counters.skipped
        ));
        Ok(())
    }

    /// Steps 2-6 for one record
    pub async fn process(
        &self,
        ctx: &mut RunContext,
        mut record: ProtocolRecord,
    ) -> Result<RecordOutcome, ImportError> {
        // Region
        if record.region.is_new {
            match self.parameters.unknown_region {
                UnknownEntityAction::Create => {
                    db::regions::create_region(&self.pool, &record.region).await?;
                    ctx.regions.mark_persisted(&record.region.name);
                    record.region.is_new = false;
                    self.log.info(format!("Region '{}' created", record.region.name));
                }
                UnknownEntityAction::Ignore => return Ok(RecordOutcome::SkippedRegion),
                UnknownEntityAction::Stop => {
                    return Err(ImportError::UnknownEntity {
                        kind: EntityKind::Region,
                        name: record.region.name,
                    })
                }
            }
        }

        // Commission
        let known = ctx
            .commissions
            .get(record.region.id, record.commission)
            .map(|c| c.id);
        let commission_id = match known {
            Some(id) => id,
            None => match self.parameters.unknown_commission {
                UnknownEntityAction::Create => {
                    let created =
                        db::commissions::create_commission(&self.pool, record.region.id, record.commission)
                            .await?;
                    self.log.info(format!(
                        "Commission {} created in region '{}'",
                        record.commission, record.region.name
                    ));
                    let id = created.id;
                    ctx.commissions.insert(created);
                    id
                }
                UnknownEntityAction::Ignore => return Ok(RecordOutcome::SkippedCommission),
                UnknownEntityAction::Stop => {
                    return Err(ImportError::UnknownEntity {
                        kind: EntityKind::Commission,
                        name: format!("{} / {}", record.region.name, record.commission),
                    })
                }
            },
        };

        // Duplicate detection
        let lookup = !ctx.provider_is_new || ctx.written.contains(&commission_id);
        let existing = if lookup {
            db::protocols::find_protocol(&self.pool, ctx.provider.id, record.region.id, record.commission)
                .await?
        } else {
            None
        };

        match self.decide(existing.as_ref(), &record) {
            Decision::Unchanged => Ok(RecordOutcome::Unchanged),
            Decision::Keep => {
                self.log.warn(format!(
                    "Region '{}', commission {}: values differ from the stored protocol, kept stored version",
                    record.region.name, record.commission
                ));
                Ok(RecordOutcome::ChangeKept)
            }
            Decision::Create => {
                self.resolve_attachments(&mut record).await?;
                let (_, images) = db::protocols::insert_protocol(
                    &self.pool,
                    ctx.provider.id,
                    commission_id,
                    &record,
                    &ctx.poll.candidates,
                )
                .await?;
                ctx.written.insert(commission_id);
                Ok(RecordOutcome::Created { images })
            }
            Decision::Replace(protocol_id) => {
                self.resolve_attachments(&mut record).await?;
                let images =
                    db::protocols::replace_protocol(&self.pool, protocol_id, &record, &ctx.poll.candidates)
                        .await?;
                Ok(RecordOutcome::Updated { images })
            }
        }
    }

    fn decide(&self, existing: Option<&Protocol>, record: &ProtocolRecord) -> Decision {
        match existing {
            None => Decision::Create,
            Some(stored) if stored.matches(record) => Decision::Unchanged,
            Some(stored) => match self.parameters.update_policy {
                UpdatePolicy::Replace => Decision::Replace(stored.id),
                UpdatePolicy::SkipWithWarning => Decision::Keep,
            },
        }
    }

    /// Fill in bytes for images that only carry a URI
    ///
    /// A failed transfer keeps the image row with its URI but no bytes;
    /// cancellation aborts the record.
    async fn resolve_attachments(&self, record: &mut ProtocolRecord) -> Result<(), ImportError> {
        if !self.parameters.download_images {
            return Ok(());
        }
        let Some(fetcher) = &self.fetcher else {
            return Ok(());
        };

        let region = record.region.name.clone();
        let commission = record.commission;

        for image in record.images.iter_mut().filter(|i| i.bytes.is_none()) {
            let Some(uri) = image.uri.clone() else {
                continue;
            };

            let cached_path = self
                .cache
                .as_ref()
                .and_then(|c| c.path_for_uri(&region, commission, &uri).map(|p| (c, p)));

            if let Some((cache, path)) = &cached_path {
                match cache.read(path).await {
                    Ok(Some(bytes)) => {
                        image.bytes = Some(bytes);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cached image unreadable"),
                }
            }

            if self.cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            match fetcher.fetch(&uri, self.sink.as_ref(), &self.cancel).await {
                Ok(bytes) => {
                    if let Some((cache, path)) = &cached_path {
                        if let Err(e) = cache.write(path, &bytes).await {
                            self.log.warn(format!("Could not cache {}: {}", uri, e));
                        }
                    }
                    image.bytes = Some(bytes);
                }
                Err(FetchError::Cancelled) => return Err(ImportError::Cancelled),
                Err(e) => {
                    let failure = ImportError::AttachmentFetch {
                        uri: uri.clone(),
                        message: e.to_string(),
                    };
                    self.log.warn(format!("{}, image saved without bytes", failure));
                }
            }
        }

        Ok(())
    }

    fn report(&self, seq: usize, region: &str, commission: i32, outcome: RecordOutcome) {
        let line = match outcome {
            RecordOutcome::Created { images } => format!(
                "#{} protocol saved. Region: {}, commission: {}. Images: {}",
                seq, region, commission, images
            ),
            RecordOutcome::Updated { images } => format!(
                "#{} protocol updated. Region: {}, commission: {}. Images: {}",
                seq, region, commission, images
            ),
            RecordOutcome::ChangeKept | RecordOutcome::Unchanged => format!(
                "#{} protocol skipped. Region: {}, commission: {}",
                seq, region, commission
            ),
            RecordOutcome::SkippedRegion => format!(
                "#{} protocol skipped, unknown region. Region: {}, commission: {}",
                seq, region, commission
            ),
            RecordOutcome::SkippedCommission => format!(
                "#{} protocol skipped, unknown commission. Region: {}, commission: {}",
                seq, region, commission
            ),
        };

        match outcome {
            RecordOutcome::SkippedRegion | RecordOutcome::SkippedCommission => self.log.warn(line),
            _ => self.log.info(line),
        }
    }
}
