//! Election domain objects
//!
//! Regions, commissions, polls, candidates and result providers are the
//! canonical entities of the store. `ProtocolRecord` is the transient shape
//! every source adapter produces; `Protocol` is what the store keeps.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary values stored on the protocol header row
pub const SUMMARY_VALUES: usize = 18;

/// Per-candidate vote values following the summary values
pub const CANDIDATE_VALUES: usize = 7;

/// Total values every source must deliver per protocol
pub const RECORD_VALUES: usize = SUMMARY_VALUES + CANDIDATE_VALUES;

/// Region (oblast) an electoral commission belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub name: String,
    /// True until the region has been written to the store
    #[serde(skip)]
    pub is_new: bool,
}

impl Region {
    /// Region already present in the store
    pub fn existing(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_new: false,
        }
    }

    /// Transient region with a fresh identity, not yet persisted
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_new: true,
        }
    }
}

/// Numbered electoral commission (precinct) within a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub region_id: Uuid,
    pub number: i32,
}

/// Candidate (party) of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    /// Position within the poll, also the result ordinal
    pub index: i32,
}

/// Poll with its ordered candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub name: String,
    pub candidates: Vec<Candidate>,
}

/// Name-only poll definition handed to `ensure_poll_exists`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDefinition {
    pub name: String,
    pub candidates: Vec<String>,
}

impl PollDefinition {
    /// 2011 State Duma election and its seven party lists
    pub fn state_duma_2011() -> Self {
        Self {
            name: "Выборы депутатов Государственной Думы Федерального Собрания Российской Федерации шестого созыва".to_string(),
            candidates: [
                "Справедливая Россия",
                "ЛДПР",
                "Патриоты России",
                "КПРФ",
                "ЯБЛОКО",
                "Единая Россия",
                "Правое дело",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for PollDefinition {
    fn default() -> Self {
        Self::state_duma_2011()
    }
}

/// Import source / run context, distinguished by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultProvider {
    pub id: Uuid,
    pub name: String,
    pub is_file: bool,
}

/// Image reference attached to a protocol
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolImage {
    pub uri: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub index: i32,
}

impl ProtocolImage {
    pub fn from_uri(uri: impl Into<String>, index: i32) -> Self {
        Self {
            uri: Some(uri.into()),
            bytes: None,
            index,
        }
    }

    /// Rows with neither a URI nor bytes carry nothing worth storing
    pub fn is_empty(&self) -> bool {
        self.uri.as_deref().map_or(true, str::is_empty) && self.bytes.is_none()
    }
}

/// Canonical record produced by a source adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRecord {
    pub region: Region,
    /// Commission number, not yet resolved to an id
    pub commission: i32,
    /// 18 summary values followed by 7 candidate values
    pub values: [i32; RECORD_VALUES],
    pub images: Vec<ProtocolImage>,
}

impl ProtocolRecord {
    pub fn summary_values(&self) -> &[i32] {
        &self.values[..SUMMARY_VALUES]
    }

    pub fn candidate_values(&self) -> &[i32] {
        &self.values[SUMMARY_VALUES..]
    }
}

/// Persisted per-candidate result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolResult {
    pub candidate_id: Uuid,
    pub value: i32,
    pub index: i32,
}

/// Persisted image row (blob omitted when loaded for comparison)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub uri: Option<String>,
    pub has_bytes: bool,
    pub index: i32,
}

/// Persisted protocol keyed by (provider, commission)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub commission_id: Uuid,
    pub summary: Vec<i32>,
    pub results: Vec<ProtocolResult>,
    pub images: Vec<StoredImage>,
}

impl Protocol {
    /// Field-level comparison against an incoming record
    ///
    /// Equal iff all summary values, all candidate values (by ordinal) and the
    /// ordered list of image URIs match. Image bytes are not compared.
    pub fn matches(&self, record: &ProtocolRecord) -> bool {
        if self.summary.as_slice() != record.summary_values() {
            return false;
        }

        let mut results: Vec<&ProtocolResult> = self.results.iter().collect();
        results.sort_by_key(|r| r.index);
        let stored_votes: Vec<i32> = results.iter().map(|r| r.value).collect();
        if stored_votes.as_slice() != record.candidate_values() {
            return false;
        }

        let mut images: Vec<&StoredImage> = self.images.iter().collect();
        images.sort_by_key(|i| i.index);
        let stored_uris: Vec<Option<&str>> = images.iter().map(|i| i.uri.as_deref()).collect();
        let incoming_uris: Vec<Option<&str>> = record
            .images
            .iter()
            .filter(|i| !i.is_empty())
            .map(|i| i.uri.as_deref())
            .collect();
        stored_uris == incoming_uris
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: [i32; RECORD_VALUES], uris: &[&str]) -> ProtocolRecord {
        ProtocolRecord {
            region: Region::transient("Город Москва"),
            commission: 6,
            values,
            images: uris
                .iter()
                .enumerate()
                .map(|(i, u)| ProtocolImage::from_uri(*u, i as i32))
                .collect(),
        }
    }

    fn stored_from(record: &ProtocolRecord) -> Protocol {
        Protocol {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            commission_id: Uuid::new_v4(),
            summary: record.summary_values().to_vec(),
            results: record
                .candidate_values()
                .iter()
                .enumerate()
                .map(|(i, v)| ProtocolResult {
                    candidate_id: Uuid::new_v4(),
                    value: *v,
                    index: i as i32,
                })
                .collect(),
            images: record
                .images
                .iter()
                .map(|i| StoredImage {
                    uri: i.uri.clone(),
                    has_bytes: false,
                    index: i.index,
                })
                .collect(),
        }
    }

    #[test]
    fn test_identical_record_matches() {
        let mut values = [0; RECORD_VALUES];
        values[0] = 1500;
        values[24] = 7;
        let rec = record(values, &["http://ruelect.com/photos/a.jpg"]);
        assert!(stored_from(&rec).matches(&rec));
    }

    #[test]
    fn test_candidate_value_difference_detected() {
        let rec = record([1; RECORD_VALUES], &[]);
        let stored = stored_from(&rec);

        let mut changed = rec.clone();
        changed.values[SUMMARY_VALUES + 3] = 99;
        assert!(!stored.matches(&changed));
    }

    #[test]
    fn test_image_list_difference_detected() {
        let rec = record([1; RECORD_VALUES], &["http://a/1.jpg"]);
        let stored = stored_from(&rec);

        let changed = record([1; RECORD_VALUES], &["http://a/1.jpg", "http://a/2.jpg"]);
        assert!(!stored.matches(&changed));
    }

    #[test]
    fn test_empty_image_rows_ignored() {
        let rec = record([2; RECORD_VALUES], &["http://a/1.jpg"]);
        let stored = stored_from(&rec);

        let mut with_blank = rec.clone();
        with_blank.images.push(ProtocolImage::default());
        assert!(stored.matches(&with_blank));
    }

    #[test]
    fn test_transient_region_has_fresh_identity() {
        let a = Region::transient("Республика Тыва");
        let b = Region::transient("Республика Тыва");
        assert!(a.is_new);
        assert_ne!(a.id, b.id);
    }
}
