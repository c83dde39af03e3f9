//! Shared fixtures for elect-loader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use elect_common::config::TomlConfig;
use elect_common::EventBus;
use elect_loader::config::LoaderConfig;
use elect_loader::error::FetchError;
use elect_loader::services::{AttachmentFetcher, ImportManager, ImportServices, ProgressSink};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// In-memory store with every table created
///
/// One connection only: each new `sqlite::memory:` connection is a fresh database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    elect_loader::db::init_tables(&pool).await.expect("tables");
    pool
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count query")
}

/// One row of the default delimited layout
pub struct Row {
    pub region: String,
    pub commission: i32,
    /// Added to the column offset to form each of the 25 values
    pub base: i32,
    pub images: Vec<String>,
}

pub fn row(region: &str, commission: i32, base: i32, images: &[&str]) -> Row {
    Row {
        region: region.to_string(),
        commission,
        base,
        images: images.iter().map(|s| s.to_string()).collect(),
    }
}

/// Semicolon-separated windows-1251 text for the default layout
pub fn ruelect_bytes(rows: &[Row]) -> Vec<u8> {
    let mut text = String::new();
    for r in rows {
        let mut fields = vec![r.region.clone(), r.commission.to_string()];
        fields.extend((0..25).map(|i| (r.base + i).to_string()));
        fields.extend(r.images.iter().cloned());
        text.push_str(&fields.join(";"));
        text.push_str("\r\n");
    }
    let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode(&text);
    bytes.into_owned()
}

pub fn write_ruelect(dir: &Path, name: &str, rows: &[Row]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, ruelect_bytes(rows)).expect("write fixture");
    path
}

/// Configuration rooted in a temporary folder
pub fn test_config(root: &Path) -> LoaderConfig {
    LoaderConfig::resolve(Some(root), &TomlConfig::default()).expect("config")
}

pub fn test_manager(pool: SqlitePool, root: &Path, fetcher: Arc<dyn AttachmentFetcher>) -> ImportManager {
    ImportManager::new(ImportServices::new(
        pool,
        EventBus::new(1000),
        fetcher,
        test_config(root),
    ))
}

/// Returns the same bytes for every URI
#[derive(Default)]
pub struct FixedFetcher {
    pub bytes: Vec<u8>,
    pub calls: AtomicUsize,
}

impl FixedFetcher {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttachmentFetcher for FixedFetcher {
    async fn fetch(
        &self,
        uri: &str,
        sink: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.on_start(uri);
        sink.on_progress(uri, self.bytes.len() as u64, Some(self.bytes.len() as u64));
        sink.on_finish(uri, elect_common::events::DownloadOutcome::Succeeded);
        Ok(self.bytes.clone())
    }
}

/// Serves a page for one URI and fails with 404 for everything else
pub struct PageFetcher {
    pub page_uri: String,
    pub page: String,
}

#[async_trait]
impl AttachmentFetcher for PageFetcher {
    async fn fetch(
        &self,
        uri: &str,
        _sink: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        if uri == self.page_uri {
            Ok(self.page.as_bytes().to_vec())
        } else {
            Err(FetchError::Status(404))
        }
    }
}

/// Every transfer fails
pub struct FailingFetcher;

#[async_trait]
impl AttachmentFetcher for FailingFetcher {
    async fn fetch(
        &self,
        _uri: &str,
        _sink: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Status(503))
    }
}

/// Panics on the first transfer
pub struct PanickingFetcher;

#[async_trait]
impl AttachmentFetcher for PanickingFetcher {
    async fn fetch(
        &self,
        uri: &str,
        _sink: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        panic!("transfer of {} blew up", uri)
    }
}

/// Blocks until its token is cancelled
///
/// The first fetch completes immediately so earlier records get saved;
/// `entered` is notified when a later fetch starts waiting.
pub struct BlockingFetcher {
    pub entered: Arc<Notify>,
    calls: AtomicUsize,
}

impl BlockingFetcher {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AttachmentFetcher for BlockingFetcher {
    async fn fetch(
        &self,
        _uri: &str,
        _sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(b"first".to_vec());
        }
        self.entered.notify_one();
        cancel.cancelled().await;
        Err(FetchError::Cancelled)
    }
}
