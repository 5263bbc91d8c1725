//! The evidence bundle writer: a hash-chained, PHI-sterile, write-once
//! on-disk layout.
//!
//! Every substantive file gets a `.sha256` peer; `MANIFEST.json` is
//! authoritative over every file's digest and byte size, and its own
//! digest is recorded alongside it. The bundle is built under a `tmp/`
//! staging directory and renamed into place atomically — a reader only
//! ever observes the prior bundle (absent) or the complete new one, never
//! a partial write.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decisions::{DispositionRecord, Record as DecisionRecord};
use crate::error::AppError;
use crate::identity::hash_bytes;

/// Build metadata recorded at `CONFIG/app_build.json`: version, commit,
/// and a config-fingerprint hash, carried on the Run Context as its
/// build fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppBuild {
    pub version: String,
    pub commit: String,
    pub config_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEnv {
    pub os: String,
    pub arch: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIndexEntry {
    pub source_path: String,
    pub sop_instance_uid: String,
    pub series_instance_uid: String,
    pub study_instance_uid: String,
    pub sop_class_uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHashRow {
    pub source_sop_instance_uid: String,
    pub source_pixel_hash: String,
    pub source_series_uid: String,
    pub instance_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskedIndexEntry {
    pub masked_path: String,
    pub sop_instance_uid: String,
    pub disposition: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskedHashRow {
    pub masked_sop_instance_uid: String,
    pub masked_pixel_hash: String,
}

/// One `DECISIONS/detection_results.jsonl` row. Carries geometry and a
/// confidence bucket, never recovered text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResultRow {
    pub source_sop_uid: String,
    pub frame_index: i32,
    pub region_id: uuid::Uuid,
    pub bbox: (i32, i32, i32, i32),
    pub confidence_bucket: String,
    pub engine: String,
    pub engine_version: String,
    pub ruleset_id: String,
    pub config_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskingActionRow {
    pub sop_instance_uid: String,
    pub region_id: uuid::Uuid,
    pub bulk_apply_source: Option<String>,
    pub bulk_apply_id: Option<uuid::Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkageRow {
    pub source_study_uid: String,
    pub source_series_uid: String,
    pub source_sop_uid: String,
    pub masked_study_uid: String,
    pub masked_series_uid: String,
    pub masked_sop_uid: String,
    pub uid_strategy: String,
    pub deterministic_salt_id: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExceptionSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRow {
    pub sop_instance_uid: Option<String>,
    pub severity: ExceptionSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total_ingested: usize,
    pub exported: usize,
    pub skipped_unsupported: usize,
    pub excluded_by_scope: usize,
    pub failed: usize,
    pub pixel_invariant_checks_passed: usize,
    pub pixel_invariant_checks_failed: usize,
}

/// Everything the bundle writer needs to materialise one run's evidence.
pub struct BundleInput {
    pub profile_name: String,
    pub app_build: AppBuild,
    pub runtime_env: RuntimeEnv,
    pub source_index: Vec<SourceIndexEntry>,
    pub source_hashes: Vec<SourceHashRow>,
    pub masked_index: Vec<MaskedIndexEntry>,
    pub masked_hashes: Vec<MaskedHashRow>,
    pub detection_results: Vec<DetectionResultRow>,
    pub masking_actions: Vec<MaskingActionRow>,
    pub decision_log: Vec<DecisionRecord>,
    /// One row per ingested object, recording exactly one of `{EXPORTED,
    /// SKIPPED_UNSUPPORTED, EXCLUDED_BY_SCOPE, FAILED}` — the universal
    /// no-silent-drops invariant, made auditable rather than just counted.
    pub dispositions: Vec<DispositionRecord>,
    pub instance_linkage: Vec<LinkageRow>,
    pub exceptions: Vec<ExceptionRow>,
    pub verification_report: VerificationReport,
}

/// Field names a JSON/CSV record in this bundle is permitted to carry.
/// Anything matching a name on the denylist below, anywhere in the
/// serialized tree, fails the write — this is the structural proof behind
/// `stores_recovered_phi_text=false`.
const FORBIDDEN_FIELD_NAMES: &[&str] = &[
    "text",
    "recovered_text",
    "ocr_text",
    "original_value",
    "raw_text",
    "phi_text",
    "patient_name",
    "patient_id",
    "patient_birth_date",
];

/// Walk a serialized JSON value and reject it if any object key matches
/// the forbidden-field denylist. Run against every record before any
/// bytes reach disk.
pub fn assert_sterile(value: &Value) -> Result<(), AppError> {
    fn walk(value: &Value, path: &str) -> Result<(), AppError> {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let lower = k.to_ascii_lowercase();
                    if FORBIDDEN_FIELD_NAMES.iter().any(|f| lower == *f) {
                        return Err(AppError::BundleWriteFailed {
                            cause: format!("forbidden free-text field '{k}' at {path}"),
                            partial_state: true,
                        });
                    }
                    walk(v, &format!("{path}.{k}"))?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    walk(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
    walk(value, "$")
}

/// One entry in `MANIFEST.json`: a file's relative path, digest, and size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

/// Staged writer: accumulates files under a tmp root and records each
/// one's digest for the final manifest, writing the `.sha256` peer
/// alongside it as it goes.
struct Staging {
    root: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Staging {
    fn new(root: PathBuf) -> Self {
        Staging {
            root,
            entries: Vec::new(),
        }
    }

    fn write_json(&mut self, rel_path: &str, value: &Value) -> Result<(), AppError> {
        assert_sterile(value)?;
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(rel_path, &bytes)
    }

    fn write_jsonl<T: Serialize>(&mut self, rel_path: &str, rows: &[T]) -> Result<(), AppError> {
        let mut buf = Vec::new();
        for row in rows {
            let value = serde_json::to_value(row)?;
            assert_sterile(&value)?;
            serde_json::to_writer(&mut buf, &value)?;
            buf.push(b'\n');
        }
        self.write_bytes(rel_path, &buf)
    }

    fn write_csv<T: Serialize>(&mut self, rel_path: &str, rows: &[T]) -> Result<(), AppError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        for row in rows {
            let value = serde_json::to_value(row)?;
            assert_sterile(&value)?;
            wtr.serialize(row).map_err(|e| AppError::BundleWriteFailed {
                cause: e.to_string(),
                partial_state: true,
            })?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::BundleWriteFailed {
                cause: e.to_string(),
                partial_state: true,
            })?;
        self.write_bytes(rel_path, &bytes)
    }

    fn write_text(&mut self, rel_path: &str, contents: &str) -> Result<(), AppError> {
        self.write_bytes(rel_path, contents.as_bytes())
    }

    fn write_bytes(&mut self, rel_path: &str, bytes: &[u8]) -> Result<(), AppError> {
        let full_path = self.root.join(rel_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, bytes)?;

        let digest = hash_bytes(bytes);
        fs::write(
            self.root.join(format!("{rel_path}.sha256")),
            format!("{digest}\n"),
        )?;

        self.entries.push(ManifestEntry {
            path: rel_path.to_string(),
            sha256: digest,
            size_bytes: bytes.len() as u64,
        });
        Ok(())
    }
}

/// Write the full evidence bundle for one run under `bundle_root`
/// (typically `<run_dir>/bundle/`), returning the path to the finished
/// `EVIDENCE_<run_id>_<timestamp>/` directory.
///
/// Writes to a sibling tmp directory first, then renames into place —
/// callers never observe a half-written bundle. On any failure, the tmp
/// directory is left for forensic inspection (never silently swallowed)
/// and the caller must translate this into run-failure without
/// committing decisions.
pub fn write_bundle(
    bundle_root: &Path,
    tmp_root: &Path,
    run_id: &str,
    started_at: DateTime<Utc>,
    input: &BundleInput,
) -> Result<PathBuf, AppError> {
    let dir_name = format!(
        "EVIDENCE_{run_id}_{}",
        started_at.format("%Y%m%dT%H%M%SZ")
    );
    let staging_root = tmp_root.join(&dir_name);
    if staging_root.exists() {
        fs::remove_dir_all(&staging_root)?;
    }
    fs::create_dir_all(&staging_root)?;

    let mut staging = Staging::new(staging_root.clone());

    staging.write_json(
        "CONFIG/profile.json",
        &serde_json::json!({ "profile_name": input.profile_name }),
    )?;
    staging.write_json("CONFIG/app_build.json", &serde_json::to_value(&input.app_build)?)?;
    staging.write_json("CONFIG/runtime_env.json", &serde_json::to_value(&input.runtime_env)?)?;

    staging.write_json(
        "INPUT/source_index.json",
        &serde_json::to_value(&input.source_index)?,
    )?;
    staging.write_csv("INPUT/source_hashes.csv", &input.source_hashes)?;

    staging.write_json(
        "OUTPUT/masked_index.json",
        &serde_json::to_value(&input.masked_index)?,
    )?;
    staging.write_csv("OUTPUT/masked_hashes.csv", &input.masked_hashes)?;

    staging.write_jsonl("DECISIONS/detection_results.jsonl", &input.detection_results)?;
    staging.write_jsonl("DECISIONS/masking_actions.jsonl", &input.masking_actions)?;
    staging.write_jsonl("DECISIONS/decision_log.jsonl", &input.decision_log)?;

    staging.write_csv("LINKAGE/instance_linkage.csv", &input.instance_linkage)?;

    staging.write_jsonl("QA/exceptions.jsonl", &input.exceptions)?;
    staging.write_jsonl("QA/dispositions.jsonl", &input.dispositions)?;
    staging.write_json(
        "QA/verification_report.json",
        &serde_json::to_value(&input.verification_report)?,
    )?;

    // Sort entries for a deterministic manifest before computing the
    // tree listing and the manifest's own digest.
    staging.entries.sort_by(|a, b| a.path.cmp(&b.path));

    let tree_listing = {
        let mut lines: Vec<String> = staging
            .entries
            .iter()
            .map(|e| format!("{}  {}", e.sha256, e.path))
            .collect();
        lines.sort();
        lines.join("\n") + "\n"
    };
    staging.write_text("SIGNATURE/bundle_tree.txt", &tree_listing)?;

    let manifest = Manifest {
        run_id: run_id.to_string(),
        generated_at: started_at,
        files: staging.entries.clone(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    fs::write(staging_root.join("MANIFEST.json"), &manifest_bytes)?;
    let manifest_digest = hash_bytes(&manifest_bytes);
    fs::write(
        staging_root.join("MANIFEST.sha256"),
        format!("{manifest_digest}\n"),
    )?;

    fs::create_dir_all(bundle_root)?;
    let final_path = bundle_root.join(&dir_name);
    fs::rename(&staging_root, &final_path).map_err(|e| AppError::BundleWriteFailed {
        cause: e.to_string(),
        partial_state: true,
    })?;

    Ok(final_path)
}

/// Recompute and verify every file's digest in an already-written bundle
/// against its `.sha256` peer and `MANIFEST.json`. Used by tests and by
/// the `QA/verification_report.json` producer's self-check.
pub fn verify_bundle(bundle_path: &Path) -> Result<(), AppError> {
    let manifest_bytes = fs::read(bundle_path.join("MANIFEST.json"))?;
    let manifest_sha256 = fs::read_to_string(bundle_path.join("MANIFEST.sha256"))?;
    if hash_bytes(&manifest_bytes) != manifest_sha256.trim() {
        return Err(AppError::BundleWriteFailed {
            cause: "MANIFEST.json digest does not match MANIFEST.sha256".to_string(),
            partial_state: false,
        });
    }

    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
    let mut by_path: BTreeMap<&str, &ManifestEntry> = BTreeMap::new();
    for entry in &manifest.files {
        by_path.insert(entry.path.as_str(), entry);
    }

    for entry in &manifest.files {
        let bytes = fs::read(bundle_path.join(&entry.path))?;
        if hash_bytes(&bytes) != entry.sha256 {
            return Err(AppError::BundleWriteFailed {
                cause: format!("digest mismatch for {}", entry.path),
                partial_state: false,
            });
        }
        let peer = fs::read_to_string(bundle_path.join(format!("{}.sha256", entry.path)))?;
        if peer.trim() != entry.sha256 {
            return Err(AppError::BundleWriteFailed {
                cause: format!("{} does not match its .sha256 peer", entry.path),
                partial_state: false,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::{Record, ReasonCode, ScopeLevel, TargetType};

    fn sample_input() -> BundleInput {
        BundleInput {
            profile_name: "internal_repair".to_string(),
            app_build: AppBuild {
                version: "0.1.0".to_string(),
                commit: "deadbeef".to_string(),
                config_hash: hash_bytes(b"config"),
            },
            runtime_env: RuntimeEnv {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                hostname: "test-host".to_string(),
            },
            source_index: vec![],
            source_hashes: vec![],
            masked_index: vec![],
            masked_hashes: vec![],
            detection_results: vec![],
            masking_actions: vec![],
            decision_log: vec![Record {
                scope_level: ScopeLevel::Instance,
                scope_uid: "1.2.3".to_string(),
                target_type: TargetType::Tag,
                target_name: "PatientName".to_string(),
                action: "REMOVE".to_string(),
                reason_code: ReasonCode::Hipaa18Name,
                rule_source: "internal_repair".to_string(),
                region: None,
                hash_before: None,
                hash_after: None,
                timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            }],
            dispositions: vec![],
            instance_linkage: vec![],
            exceptions: vec![],
            verification_report: VerificationReport {
                total_ingested: 1,
                exported: 1,
                skipped_unsupported: 0,
                excluded_by_scope: 0,
                failed: 0,
                pixel_invariant_checks_passed: 1,
                pixel_invariant_checks_failed: 0,
            },
        }
    }

    #[test]
    fn write_bundle_produces_a_self_consistent_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle_root = tmp.path().join("bundle");
        let tmp_root = tmp.path().join("tmp");
        let started_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let path = write_bundle(&bundle_root, &tmp_root, "run-abc", started_at, &sample_input())
            .unwrap();

        assert!(path.join("MANIFEST.json").exists());
        assert!(path.join("MANIFEST.sha256").exists());
        assert!(path.join("DECISIONS/decision_log.jsonl").exists());
        verify_bundle(&path).unwrap();
    }

    #[test]
    fn assert_sterile_rejects_a_forbidden_field() {
        let bad = serde_json::json!({ "patient_name": "Jane Doe" });
        assert!(assert_sterile(&bad).is_err());
    }

    #[test]
    fn assert_sterile_accepts_a_clean_record() {
        let ok = serde_json::json!({ "target_name": "PatientName", "action": "REMOVE" });
        assert!(assert_sterile(&ok).is_ok());
    }

    #[test]
    fn tampering_with_a_written_file_fails_verification() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle_root = tmp.path().join("bundle");
        let tmp_root = tmp.path().join("tmp");
        let started_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let path = write_bundle(&bundle_root, &tmp_root, "run-abc", started_at, &sample_input())
            .unwrap();
        fs::write(path.join("DECISIONS/decision_log.jsonl"), b"tampered\n").unwrap();

        assert!(verify_bundle(&path).is_err());
    }
}
