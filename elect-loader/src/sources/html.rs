//! HTML results-page source
//!
//! The page is third-party markup, so every structural problem is local to
//! one commission section: it is logged and the section skipped.
//!
//! Expected structure, in document order:
//! - `h2.oblast` region header
//! - `h3.uik` commission header, first integer in its text is the number
//! - `table.observers_data` whose first `tr.obs` row has 26 cells
//!   (a label followed by the 25 values)
//! - `div.photo_names` holding the image links

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, ImportError};
use crate::models::{ProtocolImage, ProtocolRecord, RECORD_VALUES};
use crate::services::fetcher::{AttachmentFetcher, ProgressSink};
use crate::services::resolver::RegionResolver;
use crate::services::run_log::RunLog;

/// Cells of a result row: one label plus the values
const RESULT_CELLS: usize = RECORD_VALUES + 1;

/// Where to get the results page from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLocation {
    Url(String),
    File(PathBuf),
}

impl std::fmt::Display for PageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageLocation::Url(url) => write!(f, "{}", url),
            PageLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Download or read the page markup
pub async fn load_page(
    location: &PageLocation,
    fetcher: &dyn AttachmentFetcher,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<String, ImportError> {
    let bytes = match location {
        PageLocation::File(path) => tokio::fs::read(path).await?,
        PageLocation::Url(url) => match fetcher.fetch(url, sink, cancel).await {
            Ok(bytes) => bytes,
            Err(FetchError::Cancelled) => return Err(ImportError::Cancelled),
            Err(e) => {
                return Err(ImportError::AttachmentFetch {
                    uri: url.clone(),
                    message: e.to_string(),
                })
            }
        },
    };

    let (text, _, _) = encoding_rs::UTF_8.decode(&bytes);
    Ok(text.into_owned())
}

/// One commission section as found in the markup, not yet validated
#[derive(Debug, Default)]
struct RawSection {
    ordinal: usize,
    header: String,
    region: Option<String>,
    table_found: bool,
    cells: Option<Vec<String>>,
    links: Option<Vec<String>>,
}

/// Producer of records from a results page
///
/// The markup is walked once at construction; records are produced lazily
/// from the extracted sections.
pub struct HtmlSource {
    sections: std::vec::IntoIter<RawSection>,
    attachments: HashMap<String, PathBuf>,
}

impl HtmlSource {
    /// `attachments` maps image URIs (without query string) to cached files
    pub fn new(markup: &str, attachments: HashMap<String, PathBuf>) -> Self {
        let sections = extract_sections(markup);
        tracing::debug!(sections = sections.len(), "Commission sections found");
        Self {
            sections: sections.into_iter(),
            attachments,
        }
    }

    /// Produce the next well-formed record, skipping broken sections
    pub fn next_record(&mut self, resolver: &dyn RegionResolver, log: &RunLog) -> Option<ProtocolRecord> {
        for section in self.sections.by_ref() {
            match build_record(&section, resolver, &self.attachments, log) {
                Ok(record) => return Some(record),
                Err(message) => {
                    log.error(format!(
                        "Section #{} '{}' skipped: {}",
                        section.ordinal, section.header, message
                    ));
                }
            }
        }
        None
    }

    pub fn records<'a>(
        &'a mut self,
        resolver: &'a dyn RegionResolver,
        log: &'a RunLog,
    ) -> impl Iterator<Item = Result<ProtocolRecord, ImportError>> + Send + 'a {
        std::iter::from_fn(move || self.next_record(resolver, log).map(Ok))
    }
}

fn has_class(element: &ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("built-in selector is valid")
}

struct Selectors {
    structure: Selector,
    data_row: Selector,
    cell: Selector,
    link: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        structure: selector("h2.oblast, h3.uik, table.observers_data, div.photo_names"),
        data_row: selector("tr.obs"),
        cell: selector("td"),
        link: selector("a[href]"),
    })
}

fn extract_sections(markup: &str) -> Vec<RawSection> {
    let document = Html::parse_document(markup);
    let sel = selectors();

    let mut sections = Vec::new();
    let mut region: Option<String> = None;
    let mut current: Option<RawSection> = None;

    for element in document.select(&sel.structure) {
        match element.value().name() {
            "h2" if has_class(&element, "oblast") => {
                region = Some(text_of(&element));
            }
            "h3" if has_class(&element, "uik") => {
                if let Some(done) = current.take() {
                    sections.push(done);
                }
                current = Some(RawSection {
                    ordinal: sections.len() + 1,
                    header: text_of(&element),
                    region: region.clone(),
                    ..Default::default()
                });
            }
            "table" => {
                if let Some(section) = current.as_mut().filter(|s| !s.table_found) {
                    section.table_found = true;
                    section.cells = element.select(&sel.data_row).next().map(|row| {
                        row.select(&sel.cell).map(|td| text_of(&td)).collect()
                    });
                }
            }
            "div" => {
                if let Some(section) = current.as_mut().filter(|s| s.links.is_none()) {
                    section.links = Some(
                        element
                            .select(&sel.link)
                            .filter_map(|a| a.value().attr("href"))
                            .map(str::to_string)
                            .collect(),
                    );
                }
            }
            _ => {}
        }
    }

    if let Some(done) = current {
        sections.push(done);
    }
    sections
}

fn number_pattern() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"\d+").expect("built-in pattern is valid"))
}

fn build_record(
    section: &RawSection,
    resolver: &dyn RegionResolver,
    attachments: &HashMap<String, PathBuf>,
    log: &RunLog,
) -> Result<ProtocolRecord, String> {
    let region_name = section
        .region
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or("no region header precedes the commission header")?;

    let digits = number_pattern()
        .find(&section.header)
        .ok_or("commission header has no number")?;
    let commission: i32 = digits
        .as_str()
        .parse()
        .map_err(|_| format!("commission number '{}' out of range", digits.as_str()))?;

    if !section.table_found {
        return Err("results table not found".to_string());
    }
    let cells = section.cells.as_ref().ok_or("results table has no data row")?;
    if cells.len() != RESULT_CELLS {
        return Err(format!(
            "data row has {} cells, expected {}",
            cells.len(),
            RESULT_CELLS
        ));
    }

    let mut values = [0i32; RECORD_VALUES];
    for (slot, cell) in values.iter_mut().zip(&cells[1..]) {
        *slot = cell
            .parse()
            .map_err(|_| format!("cell '{}' is not an integer", cell))?;
    }

    let links = section.links.as_ref().ok_or("image container not found")?;
    if links.is_empty() {
        log.warn(format!(
            "{}, commission {}: no image links",
            region_name, commission
        ));
    }

    let images = links
        .iter()
        .enumerate()
        .map(|(index, href)| attachment(href, index as i32, attachments, log))
        .collect();

    Ok(ProtocolRecord {
        region: resolver.resolve_or_create(region_name),
        commission,
        values,
        images,
    })
}

fn attachment(
    href: &str,
    index: i32,
    attachments: &HashMap<String, PathBuf>,
    log: &RunLog,
) -> ProtocolImage {
    let uri = href.split('?').next().unwrap_or(href);
    let mut image = ProtocolImage::from_uri(uri, index);

    match attachments.get(uri) {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => image.bytes = Some(bytes),
            Err(e) => log.warn(format!("Cached image {} unreadable: {}", path.display(), e)),
        },
        None => tracing::debug!(uri, "Image not in local cache"),
    }

    image
}
