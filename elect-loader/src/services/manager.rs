//! Import run registry and lifecycle
//!
//! At most one run is active at a time. A run is driven through
//! INITIALIZING → STREAMING and finalized exactly once into COMPLETED,
//! CANCELLED or FAILED; the session row is saved after every transition.

use chrono::Utc;
use elect_common::{EventBus, ImportEvent};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::db;
use crate::error::{ImportError, StartError};
use crate::models::{ImportParameters, ImportSession, ImportState};
use crate::services::fetcher::{AttachmentFetcher, EventProgressSink, ProgressSink};
use crate::services::image_cache::ImageCache;
use crate::services::prefetch::{prefetch_images, PrefetchSummary};
use crate::services::reconciler::ReconciliationEngine;
use crate::services::resolver::{RegionIndex, RunContext};
use crate::services::run_log::RunLog;
use crate::sources::{
    load_page, DelimitedSource, HtmlSource, LayoutKind, PageLocation, ProtocolSource, ImportSource,
};

/// What to import and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    #[serde(flatten)]
    pub source: ImportSource,
    /// Provider name; defaults to the file name, or the configured provider for pages
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub parameters: ImportParameters,
}

/// Everything a run needs besides its own request
pub struct ImportServices {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub fetcher: Arc<dyn AttachmentFetcher>,
    pub image_cache: ImageCache,
    pub config: LoaderConfig,
}

impl ImportServices {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        fetcher: Arc<dyn AttachmentFetcher>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            fetcher,
            image_cache: ImageCache::new(config.images_folder.clone()),
            config,
        }
    }

    /// Distinct region names of a delimited file the store does not know
    pub async fn check_regions(&self, path: &Path, layout: LayoutKind) -> Result<Vec<String>, ImportError> {
        let index = RegionIndex::load(&self.db).await?;
        let mut source = DelimitedSource::open(path, layout.layout(), self.config.tabular)?;
        let unknown = source.check_regions(&index)?;

        tracing::info!(path = %path.display(), unknown = unknown.len(), "Region check finished");
        Ok(unknown)
    }

    /// Create every region named in a delimited file that the store lacks
    pub async fn load_regions(&self, path: &Path, layout: LayoutKind) -> Result<usize, ImportError> {
        let mut source = DelimitedSource::open(path, layout.layout(), self.config.tabular)?;
        let names = source.collect_region_names()?;
        let created = db::regions::create_missing_regions(&self.db, &names).await?;

        tracing::info!(path = %path.display(), found = names.len(), created, "Regions loaded");
        Ok(created)
    }

    /// Download the results page and cache every image it links
    pub async fn prefetch(
        &self,
        location: &PageLocation,
        cancel: &CancellationToken,
    ) -> Result<PrefetchSummary, ImportError> {
        let log = RunLog::new(None, Some(self.event_bus.clone()));
        let sink = EventProgressSink::new(None, self.event_bus.clone());

        let page = load_page(location, self.fetcher.as_ref(), &sink, cancel).await?;
        let (_, summary) = prefetch_images(
            &page,
            &self.config.image_uri_pattern,
            &self.image_cache,
            self.fetcher.as_ref(),
            &sink,
            cancel,
            &log,
        )
        .await?;
        Ok(summary)
    }

    fn page_location(&self, url: &Option<String>, file: &Option<std::path::PathBuf>) -> PageLocation {
        match (file, url) {
            (Some(file), _) => PageLocation::File(file.clone()),
            (None, Some(url)) => PageLocation::Url(url.clone()),
            (None, None) => PageLocation::Url(self.config.page_url.clone()),
        }
    }

    async fn open_source(
        &self,
        origin: &ImportSource,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        log: &RunLog,
    ) -> Result<ProtocolSource, ImportError> {
        match origin {
            ImportSource::Delimited { path, layout } => {
                let source = DelimitedSource::open(path, layout.layout(), self.config.tabular)?;
                log.info(format!("Reading {}", path.display()));
                Ok(ProtocolSource::Delimited(source))
            }
            ImportSource::Html {
                url,
                file,
                prefetch_images: prefetch,
            } => {
                let location = self.page_location(url, file);
                log.info(format!("Loading page {}", location));
                let page = load_page(&location, self.fetcher.as_ref(), sink, cancel).await?;

                let attachments = if *prefetch {
                    let (map, _) = prefetch_images(
                        &page,
                        &self.config.image_uri_pattern,
                        &self.image_cache,
                        self.fetcher.as_ref(),
                        sink,
                        cancel,
                        log,
                    )
                    .await?;
                    map
                } else {
                    HashMap::new()
                };

                let source = tokio::task::spawn_blocking(move || HtmlSource::new(&page, attachments))
                    .await
                    .map_err(|e| ImportError::Unhandled(anyhow::anyhow!("Page parsing panicked: {}", e)))?;
                Ok(ProtocolSource::Html(source))
            }
        }
    }

    fn provider_for(&self, request: &ImportRequest) -> String {
        match (&request.provider, &request.source) {
            (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
            (_, ImportSource::Delimited { .. }) => request.source.label(),
            (_, ImportSource::Html { .. }) => self.config.html_provider.clone(),
        }
    }
}

/// Registry of background import runs
#[derive(Clone)]
pub struct ImportManager {
    services: Arc<ImportServices>,
    /// Cancellation tokens of active runs
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Last run-fatal error, for diagnostics
    last_error: Arc<RwLock<Option<String>>>,
}

impl ImportManager {
    pub fn new(services: ImportServices) -> Self {
        Self {
            services: Arc::new(services),
            active: Arc::new(RwLock::new(HashMap::new())),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn services(&self) -> &ImportServices {
        &self.services
    }

    /// Register a run and drive it on a background task
    ///
    /// Returns the session as registered (state IDLE). A run whose task
    /// panics is finalized as FAILED and released from the registry.
    pub async fn start(&self, request: ImportRequest) -> Result<ImportSession, StartError> {
        let cancel = CancellationToken::new();
        let session = self.register(&request, cancel.clone()).await?;

        let manager = self.clone();
        let spawned = session.clone();
        let session_id = session.session_id;
        tokio::spawn(async move {
            tracing::info!(session_id = %session_id, "Background import task started");
            let runner = manager.clone();
            let fallback = spawned.clone();
            let handle =
                tokio::spawn(async move { runner.execute(spawned, request.source, cancel).await });

            let finished = match handle.await {
                Ok(finished) => finished,
                Err(join_error) => manager.abandon_run(fallback, join_error).await,
            };
            manager.unregister(session_id).await;
            tracing::info!(
                session_id = %session_id,
                state = ?finished.state,
                "Background import task finished"
            );
        });

        Ok(session)
    }

    /// Register a run and drive it on the current task
    ///
    /// `cancel` is the run's token; cancelling it stops the run after the
    /// record in flight.
    pub async fn run_to_completion(
        &self,
        request: ImportRequest,
        cancel: CancellationToken,
    ) -> Result<ImportSession, StartError> {
        let session = self.register(&request, cancel.clone()).await?;
        let session_id = session.session_id;
        let finished = self.execute(session, request.source, cancel).await;
        self.unregister(session_id).await;
        Ok(finished)
    }

    /// Signal an active run to stop; false if no such run is active
    pub async fn cancel(&self, session_id: Uuid) -> bool {
        match self.active.read().await.get(&session_id) {
            Some(token) => {
                tracing::info!(session_id = %session_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, session_id: Uuid) -> bool {
        self.active.read().await.contains_key(&session_id)
    }

    pub async fn active_session(&self) -> Option<Uuid> {
        self.active.read().await.keys().next().copied()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn register(&self, request: &ImportRequest, cancel: CancellationToken) -> Result<ImportSession, StartError> {
        validate_source(&request.source)?;

        let session = ImportSession::new(
            request.source.label(),
            self.services.provider_for(request),
            request.parameters.clone(),
        );

        {
            let mut active = self.active.write().await;
            if let Some(running) = active.keys().next() {
                return Err(StartError::AlreadyRunning(*running));
            }
            active.insert(session.session_id, cancel);
        }

        if let Err(e) = db::sessions::save_session(&self.services.db, &session).await {
            self.unregister(session.session_id).await;
            return Err(e.into());
        }

        tracing::info!(
            session_id = %session.session_id,
            source = %session.source,
            provider = %session.provider,
            "Import session registered"
        );
        Ok(session)
    }

    async fn unregister(&self, session_id: Uuid) {
        self.active.write().await.remove(&session_id);
    }

    async fn execute(&self, mut session: ImportSession, source: ImportSource, cancel: CancellationToken) -> ImportSession {
        let log = RunLog::new(Some(session.session_id), Some(self.services.event_bus.clone()));
        let result = self.drive(&mut session, &source, &log, &cancel).await;
        self.finalize_run(&mut session, result, &log).await;
        session
    }

    /// Finalize a run whose task died without settling it
    async fn abandon_run(&self, mut session: ImportSession, join_error: tokio::task::JoinError) -> ImportSession {
        tracing::error!(
            session_id = %session.session_id,
            error = %join_error,
            "Import task terminated abnormally"
        );
        let log = RunLog::new(Some(session.session_id), Some(self.services.event_bus.clone()));
        let cause = ImportError::Unhandled(anyhow::anyhow!("Import task aborted: {}", join_error));
        self.finalize_run(&mut session, Err(cause), &log).await;
        session
    }

    async fn drive(
        &self,
        session: &mut ImportSession,
        origin: &ImportSource,
        log: &RunLog,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let services = &self.services;

        session.transition_to(ImportState::Initializing);
        self.persist(session).await;
        services.event_bus.emit_lossy(ImportEvent::SessionStarted {
            session_id: session.session_id,
            source: session.source.clone(),
            provider: session.provider.clone(),
            timestamp: Utc::now(),
        });

        let sink: Arc<dyn ProgressSink> = Arc::new(EventProgressSink::new(
            Some(session.session_id),
            services.event_bus.clone(),
        ));

        let mut source = services.open_source(origin, sink.as_ref(), cancel, log).await?;
        let mut ctx =
            RunContext::initialize(&services.db, &session.provider, source.is_file(), &services.config.poll)
                .await?;
        if ctx.provider_is_new {
            log.info(format!("Provider '{}' created", ctx.provider.name));
        }

        session.transition_to(ImportState::Streaming);
        self.persist(session).await;

        let engine = ReconciliationEngine::new(
            services.db.clone(),
            session.parameters.clone(),
            sink,
            log.clone(),
            cancel.clone(),
        )
        .with_fetcher(Arc::clone(&services.fetcher))
        .with_image_cache(services.image_cache.clone());

        let regions = Arc::clone(&ctx.regions);
        let records = source.records(&*regions, log);
        engine.run(&mut ctx, records, &mut session.counters).await
    }

    /// Settle the terminal state, persist it and announce it
    ///
    /// Never fails: errors raised here are logged and swallowed.
    async fn finalize_run(&self, session: &mut ImportSession, result: Result<(), ImportError>, log: &RunLog) {
        if session.is_terminal() {
            return;
        }

        let state = match &result {
            Ok(()) => ImportState::Completed,
            Err(e) if e.is_cancellation() => ImportState::Cancelled,
            Err(e) => {
                session.record_error(e.to_string());
                log.error(format!("Import failed: {}", e));
                *self.last_error.write().await = Some(e.to_string());
                ImportState::Failed
            }
        };
        session.transition_to(state);

        let counters = session.counters;
        let event = match state {
            ImportState::Completed => ImportEvent::SessionCompleted {
                session_id: session.session_id,
                total: counters.total,
                created: counters.created,
                updated: counters.updated,
                skipped: counters.skipped,
                duration_seconds: session.elapsed_seconds(),
                timestamp: Utc::now(),
            },
            ImportState::Cancelled => ImportEvent::SessionCancelled {
                session_id: session.session_id,
                records_processed: counters.total,
                timestamp: Utc::now(),
            },
            _ => ImportEvent::SessionFailed {
                session_id: session.session_id,
                error_message: session.last_error.clone().unwrap_or_default(),
                records_processed: counters.total,
                timestamp: Utc::now(),
            },
        };

        self.persist(session).await;
        self.services.event_bus.emit_lossy(event);

        tracing::info!(
            session_id = %session.session_id,
            state = ?session.state,
            total = counters.total,
            created = counters.created,
            updated = counters.updated,
            skipped = counters.skipped,
            "Import session finished"
        );
    }

    async fn persist(&self, session: &ImportSession) {
        if let Err(e) = db::sessions::save_session(&self.services.db, session).await {
            tracing::error!(
                session_id = %session.session_id,
                state = ?session.state,
                error = %e,
                "Failed to save import session"
            );
        }
    }
}

fn validate_source(source: &ImportSource) -> Result<(), StartError> {
    match source {
        ImportSource::Delimited { path, .. } if !path.is_file() => Err(StartError::InvalidSource(format!(
            "File does not exist: {}",
            path.display()
        ))),
        ImportSource::Html { file: Some(file), .. } if !file.is_file() => Err(StartError::InvalidSource(
            format!("Page file does not exist: {}", file.display()),
        )),
        _ => Ok(()),
    }
}
