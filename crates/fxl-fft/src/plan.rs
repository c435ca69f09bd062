use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::descriptor::{Direction, TransformKind};
use crate::element::Precision;
use crate::negotiate::NegotiatedLayout;

/// Admission mode controlling what enters the plan cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheAdmissionPolicy {
    Disabled,
    #[default]
    Lru,
}

/// Stable cache key for planning decisions of one context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    pub kind: TransformKind,
    pub direction: Direction,
    pub precision: Precision,
    pub full_extents: Vec<usize>,
    pub in_place: bool,
    pub backend: String,
}

impl PlanKey {
    #[must_use]
    pub fn new(layout: &NegotiatedLayout, in_place: bool, backend: &str) -> Self {
        let descriptor = &layout.descriptor;
        Self {
            kind: descriptor.kind(),
            direction: descriptor.direction(),
            precision: descriptor.precision(),
            full_extents: layout.full_extents.dims().to_vec(),
            in_place,
            backend: backend.to_string(),
        }
    }
}

/// Fingerprint describing how a concrete plan decomposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFingerprint {
    /// Prime factors of every dimension, slowest dimension first.
    pub radix_path: Vec<usize>,
    pub estimated_flops: u64,
    pub scratch_bytes: usize,
}

impl PlanFingerprint {
    #[must_use]
    pub fn estimate(key: &PlanKey) -> Self {
        let count = key.full_extents.iter().product::<usize>() as u64;
        let radix_path: Vec<usize> = key
            .full_extents
            .iter()
            .flat_map(|&extent| factorize_radix_path(extent))
            .collect();
        let passes = radix_path.iter().filter(|&&radix| radix > 1).count() as u64;
        let longest = key.full_extents.iter().copied().max().unwrap_or(1);
        let complex_bytes = 2 * match key.precision {
            Precision::Single => 4,
            Precision::Double => 8,
        };
        Self {
            radix_path,
            estimated_flops: count.saturating_mul(5).saturating_mul(passes.max(1)),
            scratch_bytes: longest.saturating_mul(complex_bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub key: PlanKey,
    pub fingerprint: PlanFingerprint,
}

/// Control-plane configuration for plan caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCacheConfig {
    pub capacity: usize,
    pub max_working_set_bytes: usize,
    pub admission_policy: CacheAdmissionPolicy,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            max_working_set_bytes: 64 * 1024 * 1024,
            admission_policy: CacheAdmissionPolicy::Lru,
        }
    }
}

impl PlanCacheConfig {
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_admission_policy(mut self, admission_policy: CacheAdmissionPolicy) -> Self {
        self.admission_policy = admission_policy;
        self
    }
}

/// Per-context record of plans built before, least recently used first out.
#[derive(Debug, Clone, Default)]
pub struct PlanCache {
    config: PlanCacheConfig,
    entries: HashMap<PlanKey, PlanMetadata>,
    recency: VecDeque<PlanKey>,
    working_set_bytes: usize,
}

impl PlanCache {
    #[must_use]
    pub fn new(config: PlanCacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &PlanCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn lookup(&self, key: &PlanKey) -> Option<&PlanMetadata> {
        self.entries.get(key)
    }

    /// Record a use of `key`. Returns true if it was already cached.
    pub fn touch(&mut self, key: &PlanKey) -> bool {
        if self.entries.contains_key(key) {
            self.recency.retain(|entry| entry != key);
            self.recency.push_back(key.clone());
            return true;
        }
        if self.config.admission_policy == CacheAdmissionPolicy::Disabled
            || self.config.capacity == 0
        {
            return false;
        }
        let metadata = PlanMetadata {
            key: key.clone(),
            fingerprint: PlanFingerprint::estimate(key),
        };
        self.working_set_bytes += metadata.fingerprint.scratch_bytes;
        self.entries.insert(key.clone(), metadata);
        self.recency.push_back(key.clone());
        self.evict();
        false
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.working_set_bytes = 0;
    }

    fn evict(&mut self) {
        while self.entries.len() > self.config.capacity
            || (self.working_set_bytes > self.config.max_working_set_bytes && self.entries.len() > 1)
        {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.working_set_bytes = self
                    .working_set_bytes
                    .saturating_sub(evicted.fingerprint.scratch_bytes);
            }
        }
    }
}

#[must_use]
pub fn factorize_radix_path(mut n: usize) -> Vec<usize> {
    if n <= 1 {
        return vec![1];
    }

    let mut factors = Vec::new();
    let mut p = 2usize;
    while p * p <= n {
        while n.is_multiple_of(p) {
            factors.push(p);
            n /= p;
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::{
        CacheAdmissionPolicy, PlanCache, PlanCacheConfig, PlanFingerprint, PlanKey,
        factorize_radix_path,
    };
    use crate::{Direction, Precision, TransformKind};

    fn key(extents: &[usize]) -> PlanKey {
        PlanKey {
            kind: TransformKind::C2C,
            direction: Direction::Forward,
            precision: Precision::Double,
            full_extents: extents.to_vec(),
            in_place: false,
            backend: "rustfft-host".to_string(),
        }
    }

    #[test]
    fn default_cache_config_is_bounded() {
        let config = PlanCacheConfig::default();
        assert_eq!(config.capacity, 128);
        assert_eq!(config.max_working_set_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn second_touch_is_a_hit() {
        let mut cache = PlanCache::new(PlanCacheConfig::default());
        assert!(!cache.touch(&key(&[64])));
        assert!(cache.touch(&key(&[64])));
        assert_eq!(cache.len(), 1);
        let metadata = cache.lookup(&key(&[64])).expect("cached");
        assert_eq!(metadata.fingerprint.radix_path, vec![2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let mut cache = PlanCache::new(PlanCacheConfig::default().with_capacity(2));
        cache.touch(&key(&[4]));
        cache.touch(&key(&[8]));
        cache.touch(&key(&[4]));
        cache.touch(&key(&[16]));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&key(&[8])).is_none());
        assert!(cache.lookup(&key(&[4])).is_some());
    }

    #[test]
    fn disabled_policy_never_admits() {
        let mut cache = PlanCache::new(
            PlanCacheConfig::default().with_admission_policy(CacheAdmissionPolicy::Disabled),
        );
        assert!(!cache.touch(&key(&[4])));
        assert!(!cache.touch(&key(&[4])));
        assert!(cache.is_empty());
    }

    #[test]
    fn fingerprint_covers_every_dimension() {
        let fingerprint = PlanFingerprint::estimate(&key(&[12, 7]));
        assert_eq!(fingerprint.radix_path, vec![2, 2, 3, 7]);
        assert_eq!(fingerprint.scratch_bytes, 12 * 16);
        assert_eq!(factorize_radix_path(1), vec![1]);
    }
}
