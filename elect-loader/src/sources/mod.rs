//! Source adapters
//!
//! Every adapter turns raw input into a lazy sequence of `ProtocolRecord`s,
//! resolving region names through the run's resolver as it goes.

pub mod delimited;
pub mod html;
pub mod tabular_reader;

pub use delimited::{DelimitedLayout, DelimitedSource};
pub use html::{load_page, HtmlSource, PageLocation};
pub use tabular_reader::{TabularOptions, TabularRecordReader};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ImportError;
use crate::models::ProtocolRecord;
use crate::services::resolver::RegionResolver;
use crate::services::run_log::RunLog;

/// Lazy record sequence produced by a source
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<ProtocolRecord, ImportError>> + Send + 'a>;

/// An opened source
pub enum ProtocolSource {
    Delimited(DelimitedSource),
    Html(HtmlSource),
}

impl ProtocolSource {
    pub fn records<'a>(&'a mut self, resolver: &'a dyn RegionResolver, log: &'a RunLog) -> RecordStream<'a> {
        match self {
            ProtocolSource::Delimited(source) => Box::new(source.records(resolver)),
            ProtocolSource::Html(source) => Box::new(source.records(resolver, log)),
        }
    }

    /// Whether the provider of this source is a file
    pub fn is_file(&self) -> bool {
        matches!(self, ProtocolSource::Delimited(_))
    }
}

/// Named delimited layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Region, commission, 25 values, image URIs
    #[default]
    Ruelect,
    /// Three metadata columns first, no images
    Compact,
}

impl LayoutKind {
    pub fn layout(self) -> DelimitedLayout {
        match self {
            LayoutKind::Ruelect => DelimitedLayout::RUELECT,
            LayoutKind::Compact => DelimitedLayout::COMPACT,
        }
    }
}

/// Description of a source, before it is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImportSource {
    Delimited {
        path: PathBuf,
        #[serde(default)]
        layout: LayoutKind,
    },
    Html {
        /// Page URL; the configured page is used when absent
        #[serde(default)]
        url: Option<String>,
        /// Local copy of the page, takes precedence over `url`
        #[serde(default)]
        file: Option<PathBuf>,
        /// Prefetch images into the local cache before parsing (default: true)
        #[serde(default = "default_prefetch")]
        prefetch_images: bool,
    },
}

fn default_prefetch() -> bool {
    true
}

impl ImportSource {
    /// Human-readable label, also the default provider name for files
    pub fn label(&self) -> String {
        match self {
            ImportSource::Delimited { path, .. } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ImportSource::Html { url, file, .. } => match (file, url) {
                (Some(file), _) => file.display().to_string(),
                (None, Some(url)) => url.clone(),
                (None, None) => "html".to_string(),
            },
        }
    }
}
