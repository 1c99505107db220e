//! Dataset registry: a durable cache of `protocol-network[-version]` → dataset id.
//!
//! The whole registry lives in memory and is written back to a single JSON
//! document on every mutation. Writes go through a temp file in the same
//! directory followed by a rename, so a crash mid-write leaves the previous
//! document intact. There is no cross-process locking: two writers racing on
//! the same file will each replace the other's document.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use graphscout_core::HealthStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::StoreError;

/// Document format written by this version. Any other value triggers a reseed.
pub const FORMAT_VERSION: &str = "1.0";

/// Number of entries in [`RegistryStatistics::most_used`].
const MOST_USED_LIMIT: usize = 5;

/// Built-in mappings used when no compatible document exists.
const SEED: &[(&str, &str, Option<&str>, &str, &str)] = &[(
    "uniswap",
    "ethereum",
    Some("v3"),
    "5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV",
    "Uniswap V3",
)];

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub protocol_id: String,
    pub network_id: String,
    pub version: Option<String>,
    pub dataset_id: String,
    pub display_name: String,
    #[serde(default)]
    pub health_status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub query_count: u64,
}

impl DatasetRecord {
    /// Composite key `protocol-network[-version]`.
    pub fn key(&self) -> String {
        composite_key(&self.protocol_id, &self.network_id, self.version.as_deref())
    }
}

/// Input to [`DatasetRegistry::add`].
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub protocol: String,
    pub network: String,
    pub version: Option<String>,
    pub dataset_id: String,
    pub display_name: String,
    pub health_status: HealthStatus,
}

impl NewDataset {
    pub fn new(
        protocol: impl Into<String>,
        network: impl Into<String>,
        dataset_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            network: network.into(),
            version: None,
            dataset_id: dataset_id.into(),
            display_name: display_name.into(),
            health_status: HealthStatus::Unknown,
        }
    }

    pub fn version(mut self, version: Option<impl Into<String>>) -> Self {
        self.version = version.map(Into::into);
        self
    }

    pub fn health(mut self, health_status: HealthStatus) -> Self {
        self.health_status = health_status;
        self
    }
}

/// A `most_used` row in [`RegistryStatistics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEntry {
    pub key: String,
    pub display_name: String,
    pub query_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatistics {
    pub total_records: usize,
    pub protocols: BTreeMap<String, usize>,
    pub networks: BTreeMap<String, usize>,
    pub health: BTreeMap<HealthStatus, usize>,
    /// Top records by `query_count`, highest first.
    pub most_used: Vec<UsageEntry>,
}

#[derive(Serialize)]
struct RegistryDocument<'a> {
    format_version: &'a str,
    last_update: String,
    records: BTreeMap<&'a str, &'a DatasetRecord>,
}

/// Durable key → [`DatasetRecord`] map. Single owner, no internal locking.
#[derive(Debug)]
pub struct DatasetRegistry {
    path: PathBuf,
    records: HashMap<String, DatasetRecord>,
}

impl DatasetRegistry {
    /// Open the registry document at `path`.
    ///
    /// A missing, unreadable, or version-mismatched document is replaced by the
    /// built-in seed set; this never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            path: path.into(),
            records: HashMap::new(),
        };
        match registry.load() {
            Ok(true) => info!(count = registry.records.len(), path = %registry.path.display(), "loaded dataset registry"),
            Ok(false) => registry.seed(),
            Err(e) => {
                error!(error = %e, path = %registry.path.display(), "failed to load dataset registry, reseeding");
                registry.seed();
            }
        }
        registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DatasetRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &DatasetRecord> {
        self.records.values()
    }

    // ── Lookup ──

    /// Resolve a dataset id, bumping the hit record's `query_count`.
    ///
    /// Tries the exact versioned key, then the unversioned key, then any record
    /// for the same protocol and network. Among several such records the one
    /// with the highest `query_count` wins, then the most recently checked,
    /// then the lexicographically smallest key.
    pub fn find(&mut self, protocol: &str, network: &str, version: Option<&str>) -> Option<String> {
        let protocol = normalize(protocol);
        let network = normalize(network);
        let version = version.map(normalize).filter(|v| !v.is_empty());

        let mut hit = None;
        if let Some(v) = version.as_deref() {
            let key = composite_key(&protocol, &network, Some(v));
            if self.records.contains_key(&key) {
                debug!(key = %key, "exact registry match");
                hit = Some(key);
            }
        }
        if hit.is_none() {
            let key = composite_key(&protocol, &network, None);
            if self.records.contains_key(&key) {
                debug!(key = %key, "unversioned registry match");
                hit = Some(key);
            }
        }
        if hit.is_none() {
            hit = self
                .records
                .iter()
                .filter(|(_, r)| r.protocol_id == protocol && r.network_id == network)
                .max_by(|(ka, a), (kb, b)| prefer(a, b).then_with(|| kb.cmp(ka)))
                .map(|(k, _)| k.clone());
            if let Some(key) = &hit {
                debug!(key = %key, "any-version registry match");
            }
        }

        match hit.and_then(|key| self.records.get_mut(&key)) {
            Some(record) => {
                record.query_count += 1;
                info!(key = %record.key(), dataset_id = %record.dataset_id, "registry hit");
                Some(record.dataset_id.clone())
            }
            None => {
                info!(protocol = %protocol, network = %network, version = ?version, "registry miss");
                None
            }
        }
    }

    // ── Mutation ──

    /// Insert or overwrite the record at the entry's composite key and persist.
    ///
    /// Returns `false` if the key is malformed or the document could not be
    /// written; in the latter case the in-memory record is kept.
    pub fn add(&mut self, entry: NewDataset) -> bool {
        let protocol = normalize(&entry.protocol);
        let network = normalize(&entry.network);
        let version = entry
            .version
            .as_deref()
            .map(normalize)
            .filter(|v| !v.is_empty());

        if let Err(e) = validate_key_parts(&protocol, &network, version.as_deref()) {
            error!(error = %e, "rejected registry entry");
            return false;
        }

        let key = composite_key(&protocol, &network, version.as_deref());
        // Usage survives an overwrite; the counter never goes backwards.
        let query_count = self.records.get(&key).map_or(0, |r| r.query_count);
        let record = DatasetRecord {
            protocol_id: protocol,
            network_id: network,
            version,
            dataset_id: entry.dataset_id,
            display_name: entry.display_name,
            health_status: entry.health_status,
            last_checked: Utc::now(),
            query_count,
        };
        let dataset_id = record.dataset_id.clone();
        self.records.insert(key.clone(), record);

        match self.save() {
            Ok(()) => {
                info!(key = %key, dataset_id = %dataset_id, "added registry mapping");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to persist registry mapping");
                false
            }
        }
    }

    /// Remove the record at the exact key. Returns `true` if removed and persisted.
    pub fn remove(&mut self, protocol: &str, network: &str, version: Option<&str>) -> bool {
        let key = key_from_parts(protocol, network, version);
        if self.records.remove(&key).is_none() {
            warn!(key = %key, "no registry mapping to remove");
            return false;
        }
        match self.save() {
            Ok(()) => {
                info!(key = %key, "removed registry mapping");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to persist registry removal");
                false
            }
        }
    }

    /// Set the health of the record at the exact key and persist.
    pub fn update_health(
        &mut self,
        protocol: &str,
        network: &str,
        version: Option<&str>,
        health_status: HealthStatus,
    ) -> bool {
        let key = key_from_parts(protocol, network, version);
        let Some(record) = self.records.get_mut(&key) else {
            warn!(key = %key, "no registry mapping to update");
            return false;
        };
        record.health_status = health_status;
        record.last_checked = Utc::now();

        match self.save() {
            Ok(()) => {
                info!(key = %key, health = %health_status, "updated registry health");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to persist registry health");
                false
            }
        }
    }

    // ── Reporting ──

    /// Distinct protocol ids, sorted.
    pub fn all_protocols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.records.values().map(|r| r.protocol_id.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Distinct networks registered for `protocol`, sorted.
    pub fn protocol_networks(&self, protocol: &str) -> Vec<String> {
        let protocol = normalize(protocol);
        let mut out: Vec<String> = self
            .records
            .values()
            .filter(|r| r.protocol_id == protocol)
            .map(|r| r.network_id.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let mut protocols = BTreeMap::new();
        let mut networks = BTreeMap::new();
        let mut health: BTreeMap<HealthStatus, usize> =
            HealthStatus::ALL.iter().map(|h| (*h, 0)).collect();

        for record in self.records.values() {
            *protocols.entry(record.protocol_id.clone()).or_insert(0) += 1;
            *networks.entry(record.network_id.clone()).or_insert(0) += 1;
            *health.entry(record.health_status).or_insert(0) += 1;
        }

        let mut ranked: Vec<(&String, &DatasetRecord)> = self.records.iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| b.query_count.cmp(&a.query_count).then_with(|| ka.cmp(kb)));
        let most_used = ranked
            .into_iter()
            .take(MOST_USED_LIMIT)
            .map(|(key, r)| UsageEntry {
                key: key.clone(),
                display_name: r.display_name.clone(),
                query_count: r.query_count,
            })
            .collect();

        RegistryStatistics {
            total_records: self.records.len(),
            protocols,
            networks,
            health,
            most_used,
        }
    }

    // ── Persistence ──

    /// Load the document. `Ok(false)` means there was nothing compatible to load.
    fn load(&mut self) -> Result<bool, StoreError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let bytes = std::fs::read(&self.path)?;
        let doc: Value = serde_json::from_slice(&bytes)?;

        let format_version = doc.get("format_version").and_then(Value::as_str);
        if format_version != Some(FORMAT_VERSION) {
            info!(found = ?format_version, expected = FORMAT_VERSION, "registry format mismatch, reinitializing");
            return Ok(false);
        }

        let Some(records) = doc.get("records").and_then(Value::as_object) else {
            return Ok(false);
        };
        for (key, raw) in records {
            match serde_json::from_value::<DatasetRecord>(raw.clone()) {
                Ok(record) => {
                    let actual = record.key();
                    if actual != *key {
                        warn!(stored = %key, actual = %actual, "registry key does not match record, rekeying");
                    }
                    self.records.insert(actual, record);
                }
                Err(e) => error!(key = %key, error = %e, "skipping unreadable registry record"),
            }
        }
        Ok(true)
    }

    fn seed(&mut self) {
        info!("initializing dataset registry with built-in mappings");
        self.records.clear();
        for (protocol, network, version, dataset_id, name) in SEED {
            self.add(NewDataset::new(*protocol, *network, *dataset_id, *name).version(*version));
        }
    }

    /// Rewrite the whole document atomically.
    fn save(&self) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .ok_or_else(|| StoreError::NoParent {
                path: self.path.clone(),
            })?;
        std::fs::create_dir_all(dir)?;

        let doc = RegistryDocument {
            format_version: FORMAT_VERSION,
            last_update: Utc::now().to_rfc3339(),
            records: self.records.iter().map(|(k, r)| (k.as_str(), r)).collect(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &doc)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(count = self.records.len(), path = %self.path.display(), "saved dataset registry");
        Ok(())
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn composite_key(protocol: &str, network: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{protocol}-{network}-{v}"),
        None => format!("{protocol}-{network}"),
    }
}

fn key_from_parts(protocol: &str, network: &str, version: Option<&str>) -> String {
    let version = version.map(normalize).filter(|v| !v.is_empty());
    composite_key(&normalize(protocol), &normalize(network), version.as_deref())
}

/// Key parts must be non-empty and free of the `-` separator.
fn validate_key_parts(protocol: &str, network: &str, version: Option<&str>) -> Result<(), StoreError> {
    for (label, part) in [("protocol", Some(protocol)), ("network", Some(network)), ("version", version)] {
        if let Some(p) = part {
            if p.is_empty() || p.contains('-') {
                return Err(StoreError::InvalidKey(format!("{label} {p:?}")));
            }
        }
    }
    Ok(())
}

/// Ordering used to pick among any-version matches: greater is preferred.
fn prefer(a: &DatasetRecord, b: &DatasetRecord) -> Ordering {
    a.query_count
        .cmp(&b.query_count)
        .then_with(|| a.last_checked.cmp(&b.last_checked))
}
