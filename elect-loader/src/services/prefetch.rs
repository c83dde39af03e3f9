//! Image prefetch for the HTML results page
//!
//! Finds every image URL on the page, makes sure a copy sits in the local
//! cache and returns the URI → file map the HTML source consumes.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, ImportError};
use crate::services::fetcher::{AttachmentFetcher, ProgressSink};
use crate::services::image_cache::ImageCache;
use crate::services::run_log::RunLog;

/// Default image URL pattern; groups: 1 = region, 2 = commission, 3 = file name
pub const DEFAULT_IMAGE_URI_PATTERN: &str =
    r#"http://files\.kartaitogov\.ru/p/([^/"]+)/([^/"]+)/(?:[^/"]+/)*([^/"?]+\.jpg)"#;

/// Compile an image URL pattern (case-insensitive)
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Totals of one prefetch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    pub total: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Ensure every image referenced by the page is cached locally
///
/// Existing files are reused without fetching. A failed transfer is logged
/// and left out of the map; cancellation stops the pass.
pub async fn prefetch_images(
    page: &str,
    pattern: &Regex,
    cache: &ImageCache,
    fetcher: &dyn AttachmentFetcher,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
    log: &RunLog,
) -> Result<(HashMap<String, PathBuf>, PrefetchSummary), ImportError> {
    let mut map = HashMap::new();
    let mut summary = PrefetchSummary::default();

    for captures in pattern.captures_iter(page) {
        let (Some(uri), Some(region), Some(commission), Some(file)) =
            (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
        else {
            continue;
        };
        let uri = uri.as_str();
        if map.contains_key(uri) {
            continue;
        }
        summary.total += 1;

        let path = cache.path_for(region.as_str(), commission.as_str(), file.as_str());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            map.insert(uri.to_string(), path);
            continue;
        }

        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        match fetcher.fetch(uri, sink, cancel).await {
            Ok(bytes) => {
                cache.write(&path, &bytes).await?;
                summary.fetched += 1;
                map.insert(uri.to_string(), path);
            }
            Err(FetchError::Cancelled) => return Err(ImportError::Cancelled),
            Err(e) => {
                summary.failed += 1;
                log.warn(format!("Failed to download {}: {}", uri, e));
            }
        }
    }

    log.info(format!(
        "Total files: {}, new: {}, failed: {}",
        summary.total, summary.fetched, summary.failed
    ));
    Ok((map, summary))
}
