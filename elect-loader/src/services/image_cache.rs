//! Local cache of protocol images
//!
//! Files live at `<root>/<region>/<commission>/<file name>`. Presence of the
//! file is the only cache check; contents are never verified.

use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache path for an image of a commission
    ///
    /// The file name is percent-decoded; path separators left after decoding
    /// are replaced so the path cannot escape the commission folder.
    pub fn path_for(&self, region: &str, commission: &str, file_name: &str) -> PathBuf {
        let decoded = percent_decode_str(file_name).decode_utf8_lossy();
        self.root
            .join(sanitize(region))
            .join(sanitize(commission))
            .join(sanitize(&decoded))
    }

    /// Cache path derived from the last segment of an image URI
    pub fn path_for_uri(&self, region: &str, commission: i32, uri: &str) -> Option<PathBuf> {
        let url = url::Url::parse(uri).ok()?;
        let file_name = url.path_segments()?.last().filter(|s| !s.is_empty())?;
        Some(self.path_for(region, &commission.to_string(), file_name))
    }

    /// Cached bytes, if the file exists
    pub async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write bytes, creating the folders on the way
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
