//! Ruleset Store: versioned, per-jurisdiction regulatory documents.
//!
//! Grounded in the teacher's in-memory-cache-over-filesystem pattern
//! (`parking_lot::RwLock` guarding a `HashMap`, short synchronous critical
//! sections, never held across an `.await`). Mutation is read-modify-write
//! then atomic write-temp-then-rename, so a reader never observes a
//! partially written file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::models::{ChangelogEntry, JurisdictionRuleset};

/// Jurisdiction codes without a configured ruleset file alias to another
/// jurisdiction's document (GB follows EU/MiFID II).
fn resolve_alias(jurisdiction: &str) -> String {
    match jurisdiction.to_ascii_uppercase().as_str() {
        "GB" => "EU".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct RulesChanged {
    pub jurisdiction: String,
    pub new_version: String,
}

/// Provenance attached to an `ApplyPatch` call: what the caller believed the
/// prior value was, where the change came from, and a human summary for the
/// changelog entry.
#[derive(Debug, Clone)]
pub struct PatchProvenance {
    pub change_id: String,
    pub old_value: Value,
    pub source: String,
    pub summary: String,
}

pub struct RulesetStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<String, JurisdictionRuleset>>,
    events: broadcast::Sender<RulesChanged>,
}

impl RulesetStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            data_dir: data_dir.as_ref().join("jurisdictions"),
            cache: RwLock::new(HashMap::new()),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RulesChanged> {
        self.events.subscribe()
    }

    fn path_for(&self, jurisdiction: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.json", jurisdiction.to_ascii_lowercase()))
    }

    /// Returns the cached ruleset, loading it from disk on first access.
    /// Unknown jurisdictions with a configured alias resolve transparently.
    /// A missing file yields an empty ruleset (warning only); malformed JSON
    /// is a fatal configuration error.
    pub fn get(&self, jurisdiction: &str) -> Result<JurisdictionRuleset> {
        let key = resolve_alias(jurisdiction);
        if let Some(rs) = self.cache.read().get(&key) {
            return Ok(rs.clone());
        }
        let loaded = self.load_from_disk(&key)?;
        self.cache.write().insert(key, loaded.clone());
        Ok(loaded)
    }

    /// Eagerly loads every `*.json` file under the jurisdictions directory,
    /// matching the teacher's "populate cache at startup" behavior.
    pub fn load_all(&self) -> Result<usize> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating {}", self.data_dir.display()))?;
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_ascii_uppercase();
            let ruleset = self.load_from_disk(&stem)?;
            self.cache.write().insert(stem, ruleset);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn load_from_disk(&self, key: &str) -> Result<JurisdictionRuleset> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("malformed ruleset file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(jurisdiction = key, "no ruleset file found, using empty ruleset");
                Ok(JurisdictionRuleset::empty(key))
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Jurisdiction codes currently resident in the cache.
    pub fn loaded_jurisdictions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// `A:verA|B:verB` in input order; `"unknown"` when none are cached.
    pub fn version(&self, jurisdictions: &[String]) -> String {
        let cache = self.cache.read();
        let parts: Vec<String> = jurisdictions
            .iter()
            .filter_map(|j| {
                let key = resolve_alias(j);
                cache.get(&key).map(|rs| format!("{}:{}", j, rs.version))
            })
            .collect();
        if parts.is_empty() {
            "unknown".to_string()
        } else {
            parts.join("|")
        }
    }

    /// Digest of exemptions/investor-definition/transfer-restriction subtrees
    /// per jurisdiction, truncated to a byte budget, for Reasoner prompts.
    pub fn context(&self, jurisdictions: &[String]) -> String {
        const BYTE_BUDGET: usize = 4_000;
        const SUBTREES: [&str; 3] = ["exemptions", "investor_definitions", "transfer_restrictions"];

        let mut digest = serde_json::Map::new();
        for j in jurisdictions {
            let Ok(rs) = self.get(j) else { continue };
            let mut jurisdiction_slice = serde_json::Map::new();
            for key in SUBTREES {
                if let Some(v) = rs.rules.get(key) {
                    jurisdiction_slice.insert(key.to_string(), v.clone());
                }
            }
            digest.insert(j.clone(), Value::Object(jurisdiction_slice));
        }
        let mut text = serde_json::to_string(&Value::Object(digest)).unwrap_or_default();
        if text.len() > BYTE_BUDGET {
            text.truncate(BYTE_BUDGET);
        }
        text
    }

    /// Traverses a dot-path; missing intermediates or leaves return `None`,
    /// never an error.
    pub fn read_path<'a>(ruleset: &'a JurisdictionRuleset, path: &str) -> Option<&'a Value> {
        read_path_value(&ruleset.rules, path)
    }

    /// Applies a single field-level patch, persists it, and returns the new
    /// version string. Serializes per jurisdiction by holding the cache
    /// write lock across the whole read-modify-write-rename sequence.
    pub fn apply_patch(
        &self,
        jurisdiction: &str,
        path: &str,
        new_value: Value,
        provenance: PatchProvenance,
    ) -> Result<String> {
        let key = resolve_alias(jurisdiction);
        let mut cache = self.cache.write();
        let mut ruleset = match cache.get(&key) {
            Some(rs) => rs.clone(),
            None => drop_write_and_load(&mut cache, self, &key)?,
        };

        let observed = read_path_value(&ruleset.rules, path).cloned();
        let drift_warning = match &observed {
            Some(current) if *current != provenance.old_value => Some(format!(
                "observed value {} disagreed with recorded old_value {}",
                current, provenance.old_value
            )),
            None if !provenance.old_value.is_null() => Some(format!(
                "field {} was absent; recorded old_value {} could not be verified",
                path, provenance.old_value
            )),
            _ => None,
        };
        if let Some(ref w) = drift_warning {
            warn!(jurisdiction = key, field = path, %w, "drift detected applying patch");
        }

        set_path_value(&mut ruleset.rules, path, new_value.clone());
        ruleset.last_updated = Utc::now();
        ruleset.version = next_version(&ruleset.version, ruleset.last_updated);

        ruleset.changelog.push(ChangelogEntry {
            change_id: provenance.change_id,
            field: path.to_string(),
            old_value: provenance.old_value,
            new_value,
            summary: provenance.summary,
            source: provenance.source,
            timestamp: ruleset.last_updated,
            drift_warning,
        });
        if ruleset.changelog.len() > JurisdictionRuleset::CHANGELOG_CAP {
            let overflow = ruleset.changelog.len() - JurisdictionRuleset::CHANGELOG_CAP;
            ruleset.changelog.drain(0..overflow);
        }

        self.persist(&key, &ruleset)?;
        let new_version = ruleset.version.clone();
        cache.insert(key.clone(), ruleset);
        drop(cache);

        info!(jurisdiction = key, version = %new_version, field = path, "applied patch");
        let _ = self.events.send(RulesChanged {
            jurisdiction: key,
            new_version: new_version.clone(),
        });
        Ok(new_version)
    }

    fn persist(&self, key: &str, ruleset: &JurisdictionRuleset) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(ruleset)?;
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

/// Helper for the rare case `apply_patch` is called before `get`/`load_all`
/// populated an entry: loads it under the same write lock so the whole
/// operation stays serialized for the jurisdiction.
fn drop_write_and_load(
    cache: &mut HashMap<String, JurisdictionRuleset>,
    store: &RulesetStore,
    key: &str,
) -> Result<JurisdictionRuleset> {
    let loaded = store.load_from_disk(key)?;
    cache.insert(key.to_string(), loaded.clone());
    Ok(loaded)
}

fn read_path_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets a dot-path leaf, creating intermediate object nodes as needed
/// (spec.md §9: "the Reasoner may propose paths to new subtrees").
fn set_path_value(root: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just ensured object");
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    let last = segments[segments.len() - 1];
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(last.to_string(), new_value);
}

/// Calendar-dotted `YYYY.MM.DD.NNN`, with `NNN` incrementing when another
/// version was already minted today.
fn next_version(previous: &str, now: chrono::DateTime<Utc>) -> String {
    let today = now.format("%Y.%m.%d").to_string();
    let counter = match previous.rsplit_once('.') {
        Some((prefix, suffix)) if prefix == today => {
            suffix.parse::<u32>().unwrap_or(0).saturating_add(1)
        }
        _ => 1,
    };
    format!("{today}.{counter:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, RulesetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RulesetStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn missing_file_returns_empty_ruleset() {
        let (_dir, store) = temp_store();
        let rs = store.get("US").unwrap();
        assert_eq!(rs.jurisdiction, "US");
        assert!(rs.changelog.is_empty());
    }

    #[test]
    fn gb_aliases_to_eu() {
        let (_dir, store) = temp_store();
        store
            .apply_patch(
                "EU",
                "exemptions.retail_cap",
                json!(100),
                PatchProvenance {
                    change_id: "chg_test".into(),
                    old_value: Value::Null,
                    source: "test".into(),
                    summary: "seed".into(),
                },
            )
            .unwrap();
        let gb = store.get("GB").unwrap();
        assert_eq!(
            RulesetStore::read_path(&gb, "exemptions.retail_cap"),
            Some(&json!(100))
        );
    }

    #[test]
    fn apply_patch_bumps_version_and_appends_changelog() {
        let (_dir, store) = temp_store();
        let before = store.get("US").unwrap();
        let v1 = store
            .apply_patch(
                "US",
                "accredited_investor.income.individual_income",
                json!(250_000),
                PatchProvenance {
                    change_id: "chg_a".into(),
                    old_value: json!(200_000),
                    source: "unit-test".into(),
                    summary: "raise threshold".into(),
                },
            )
            .unwrap();
        assert_ne!(v1, before.version);
        let after = store.get("US").unwrap();
        assert_eq!(after.changelog.len(), 1);
        assert_eq!(after.changelog[0].drift_warning, None);
        assert_eq!(
            RulesetStore::read_path(&after, "accredited_investor.income.individual_income"),
            Some(&json!(250_000))
        );
    }

    #[test]
    fn drift_is_logged_but_not_fatal() {
        let (_dir, store) = temp_store();
        store
            .apply_patch(
                "SG",
                "accredited_investor.net_worth",
                json!(2_000_000),
                PatchProvenance {
                    change_id: "chg_drift".into(),
                    old_value: json!(1_500_000), // disagrees with observed (absent -> null)
                    source: "unit-test".into(),
                    summary: "drift scenario".into(),
                },
            )
            .unwrap();
        let rs = store.get("SG").unwrap();
        assert!(rs.changelog[0].drift_warning.is_some());
        assert_eq!(
            RulesetStore::read_path(&rs, "accredited_investor.net_worth"),
            Some(&json!(2_000_000))
        );
    }

    #[test]
    fn changelog_is_capped_at_twenty() {
        let (_dir, store) = temp_store();
        for i in 0..25 {
            store
                .apply_patch(
                    "US",
                    "counter",
                    json!(i),
                    PatchProvenance {
                        change_id: format!("chg_{i}"),
                        old_value: if i == 0 { Value::Null } else { json!(i - 1) },
                        source: "unit-test".into(),
                        summary: format!("bump {i}"),
                    },
                )
                .unwrap();
        }
        let rs = store.get("US").unwrap();
        assert_eq!(rs.changelog.len(), JurisdictionRuleset::CHANGELOG_CAP);
        assert_eq!(rs.changelog.last().unwrap().new_value, json!(24));
    }

    #[test]
    fn creates_intermediate_nodes_for_new_subtrees() {
        let (_dir, store) = temp_store();
        store
            .apply_patch(
                "US",
                "brand.new.subtree.leaf",
                json!("value"),
                PatchProvenance {
                    change_id: "chg_new".into(),
                    old_value: Value::Null,
                    source: "unit-test".into(),
                    summary: "new subtree".into(),
                },
            )
            .unwrap();
        let rs = store.get("US").unwrap();
        assert_eq!(
            RulesetStore::read_path(&rs, "brand.new.subtree.leaf"),
            Some(&json!("value"))
        );
    }

    #[test]
    fn version_digest_orders_by_input_and_reports_unknown() {
        let (_dir, store) = temp_store();
        assert_eq!(store.version(&["US".into()]), "unknown");
        store
            .apply_patch(
                "US",
                "x",
                json!(1),
                PatchProvenance {
                    change_id: "chg_v".into(),
                    old_value: Value::Null,
                    source: "t".into(),
                    summary: "s".into(),
                },
            )
            .unwrap();
        let digest = store.version(&["US".to_string(), "SG".to_string()]);
        assert!(digest.starts_with("US:"));
    }
}
