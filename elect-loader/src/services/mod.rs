//! Import services
//!
//! Entity resolution, attachment transfer, reconciliation and the run
//! registry that ties them together.

pub mod fetcher;
pub mod image_cache;
pub mod manager;
pub mod prefetch;
pub mod reconciler;
pub mod resolver;
pub mod run_log;

pub use fetcher::{AttachmentFetcher, EventProgressSink, HttpFetcher, NoProgress, ProgressSink};
pub use image_cache::ImageCache;
pub use manager::{ImportManager, ImportRequest, ImportServices};
pub use prefetch::{prefetch_images, PrefetchSummary};
pub use reconciler::{ReconciliationEngine, RecordOutcome};
pub use resolver::{CommissionIndex, RegionIndex, RegionResolver, RunContext};
pub use run_log::RunLog;
