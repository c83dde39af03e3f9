//! Entity resolution for one import run
//!
//! `RunContext` owns every cache a run needs: regions by name, commissions by
//! (region, number), the provider and the poll candidates. It is populated
//! once at run start and never refreshed from the store mid-run.

use elect_common::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db;
use crate::models::{Commission, Poll, PollDefinition, Region, ResultProvider};

/// Region lookup consumed by source adapters
pub trait RegionResolver: Send + Sync {
    /// Cached region with this exact name, or a transient one with a fresh id
    ///
    /// Repeated calls with the same unknown name return the same transient
    /// identity.
    fn resolve_or_create(&self, name: &str) -> Region;

    /// True if the name is a region already in the store; no side effects
    fn contains(&self, name: &str) -> bool;
}

/// Name-keyed region cache
#[derive(Debug, Default)]
pub struct RegionIndex {
    by_name: Mutex<HashMap<String, Region>>,
}

impl RegionIndex {
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            by_name: Mutex::new(regions.into_iter().map(|r| (r.name.clone(), r)).collect()),
        }
    }

    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        Ok(Self::new(db::regions::load_all_regions(pool).await?))
    }

    /// Flip the cached region to persisted after it was written
    pub fn mark_persisted(&self, name: &str) {
        if let Some(region) = self.lock().get_mut(name) {
            region.is_new = false;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|r| !r.is_new).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Region>> {
        self.by_name.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegionResolver for RegionIndex {
    fn resolve_or_create(&self, name: &str) -> Region {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(|| Region::transient(name))
            .clone()
    }

    fn contains(&self, name: &str) -> bool {
        self.lock().get(name).map_or(false, |r| !r.is_new)
    }
}

/// Commission cache keyed by (region id, number)
#[derive(Debug, Default)]
pub struct CommissionIndex {
    by_key: HashMap<(Uuid, i32), Commission>,
}

impl CommissionIndex {
    pub fn new(commissions: Vec<Commission>) -> Self {
        Self {
            by_key: commissions
                .into_iter()
                .map(|c| ((c.region_id, c.number), c))
                .collect(),
        }
    }

    pub fn get(&self, region_id: Uuid, number: i32) -> Option<&Commission> {
        self.by_key.get(&(region_id, number))
    }

    pub fn insert(&mut self, commission: Commission) {
        self.by_key
            .insert((commission.region_id, commission.number), commission);
    }
}

/// Caches and identities owned by one import run
pub struct RunContext {
    pub provider: ResultProvider,
    /// Provider created by this run: no stored protocol can exist for it
    pub provider_is_new: bool,
    pub poll: Poll,
    pub regions: Arc<RegionIndex>,
    pub commissions: CommissionIndex,
    /// Commissions this run already wrote a protocol for
    pub written: HashSet<Uuid>,
}

impl RunContext {
    /// Ensure poll and provider exist, then load the region and commission caches
    pub async fn initialize(
        pool: &SqlitePool,
        provider_name: &str,
        is_file: bool,
        poll: &PollDefinition,
    ) -> Result<Self> {
        let poll = db::polls::ensure_poll_exists(pool, poll).await?;
        let (provider, provider_is_new) =
            db::providers::get_or_create_provider(pool, provider_name, is_file, poll.id).await?;
        let regions = RegionIndex::load(pool).await?;
        let commissions = CommissionIndex::new(db::commissions::load_all_commissions(pool).await?);

        tracing::debug!(
            provider = %provider.name,
            provider_is_new,
            regions = regions.len(),
            "Run context initialized"
        );

        Ok(Self {
            provider,
            provider_is_new,
            poll,
            regions: Arc::new(regions),
            commissions,
            written: HashSet::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_name_resolves_to_cached_region() {
        let stored = Region::existing(Uuid::new_v4(), "Город Москва");
        let index = RegionIndex::new(vec![stored.clone()]);

        assert_eq!(index.resolve_or_create("Город Москва"), stored);
        assert!(index.contains("Город Москва"));
    }

    #[test]
    fn test_match_is_exact_not_case_folded() {
        let index = RegionIndex::new(vec![Region::existing(Uuid::new_v4(), "Город Москва")]);
        let other = index.resolve_or_create("город москва");
        assert!(other.is_new);
    }

    #[test]
    fn test_same_unknown_name_shares_transient_identity() {
        let index = RegionIndex::default();
        let a = index.resolve_or_create("Республика Тыва");
        let b = index.resolve_or_create("Республика Тыва");

        assert!(a.is_new);
        assert_eq!(a.id, b.id);
        assert!(!index.contains("Республика Тыва"));
    }

    #[test]
    fn test_mark_persisted_flips_flag() {
        let index = RegionIndex::default();
        let transient = index.resolve_or_create("Республика Тыва");
        index.mark_persisted("Республика Тыва");

        let again = index.resolve_or_create("Республика Тыва");
        assert_eq!(again.id, transient.id);
        assert!(!again.is_new);
        assert!(index.contains("Республика Тыва"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_commission_lookup_by_region_and_number() {
        let region_id = Uuid::new_v4();
        let mut index = CommissionIndex::default();
        index.insert(Commission {
            id: Uuid::new_v4(),
            region_id,
            number: 12,
        });

        assert!(index.get(region_id, 12).is_some());
        assert!(index.get(region_id, 13).is_none());
        assert!(index.get(Uuid::new_v4(), 12).is_none());
    }
}
