//! The decision trace collector: an append-only, PHI-sterile reason log.
//!
//! `Record` has no text-value field by construction, so a record can never
//! carry an original tag value or recovered OCR text — the sterility
//! invariant is enforced by the type, not by a runtime scan of it (the
//! runtime scan in `evidence::assert_sterile` exists for the serialized
//! bundle as a whole, which also contains hand-built JSON the collector
//! doesn't own).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AppError;

/// The closed reason-code enumeration, including the two codes that
/// only show up in worksheet-detection and scope-exclusion scenarios
/// (`WORKSHEET_DETECTED`, `SCOPE_DOCUMENTS_EXCLUDED`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Hipaa18Name,
    Hipaa18Date,
    DicomPs315UidRemap,
    DicomPs315DateShift,
    DicomPs315PrivateTag,
    BurnedInTextDetected,
    UserMaskRegionSelected,
    UserOverrideRetained,
    FoiStaffRedaction,
    FoiPreservePatient,
    FoiChainOfCustody,
    SystemWhitelistRetained,
    SystemDiagnosticPreserved,
    WorksheetDetected,
    ScopeDocumentsExcluded,
}

/// What ultimately happened to one ingested object, per the universal
/// invariant that exactly one of these is recorded for every object.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Exported,
    SkippedUnsupported,
    ExcludedByScope,
    Failed,
}

/// The scope a decision was made at: the whole run, one study/series, or
/// a single object.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeLevel {
    Run,
    Study,
    Series,
    Instance,
}

/// What kind of thing the decision targets: a metadata tag, the pixel
/// payload, or an object's overall disposition.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    Tag,
    Pixel,
    Object,
}

/// One append-only decision record. Never carries an original PHI value
/// or recovered text — only tag names, reason codes, region coordinates,
/// digests, and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub scope_level: ScopeLevel,
    pub scope_uid: String,
    pub target_type: TargetType,
    pub target_name: String,
    pub action: String,
    pub reason_code: ReasonCode,
    pub rule_source: String,
    pub region: Option<RegionRef>,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A region reference carried on a decision record: geometry only, never
/// the pixel content it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRef {
    pub region_id: uuid::Uuid,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub frame_index: i32,
}

/// One object's terminal disposition, recorded exactly once for every
/// object that enters a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispositionRecord {
    pub sop_instance_uid: String,
    pub disposition: Disposition,
    pub reason: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The append-only collector. It is the only shared mutable resource in
/// the pipeline; `add` is serialised through a single mutex, and `lock()`
/// is one-way for the life of the collector.
pub struct Collector {
    records: Mutex<Vec<Record>>,
    dispositions: Mutex<Vec<DispositionRecord>>,
    locked: AtomicBool,
}

impl Default for Collector {
    fn default() -> Self {
        Collector {
            records: Mutex::new(Vec::new()),
            dispositions: Mutex::new(Vec::new()),
            locked: AtomicBool::new(false),
        }
    }
}

impl Collector {
    pub fn new() -> Self {
        Collector::default()
    }

    pub fn add(&self, record: Record) -> Result<(), AppError> {
        if self.locked.load(Ordering::Acquire) {
            return Err(AppError::CollectorLocked);
        }
        self.records.lock().push(record);
        Ok(())
    }

    pub fn record_disposition(&self, record: DispositionRecord) -> Result<(), AppError> {
        if self.locked.load(Ordering::Acquire) {
            return Err(AppError::CollectorLocked);
        }
        self.dispositions.lock().push(record);
        Ok(())
    }

    /// One-way: after `lock()`, every `add`/`record_disposition` fails
    /// with `CollectorLocked`. Called by the pipeline once the output
    /// archive has been materialised and before bundle commit.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn dispositions(&self) -> Vec<DispositionRecord> {
        self.dispositions.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(reason: ReasonCode) -> Record {
        Record {
            scope_level: ScopeLevel::Instance,
            scope_uid: "1.2.3.4".to_string(),
            target_type: TargetType::Tag,
            target_name: "PatientName".to_string(),
            action: "REMOVE".to_string(),
            reason_code: reason,
            rule_source: "research_safe_harbor".to_string(),
            region: None,
            hash_before: None,
            hash_after: None,
            timestamp: chrono::DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn add_after_lock_fails_collector_locked() {
        let collector = Collector::new();
        collector.add(sample_record(ReasonCode::Hipaa18Name)).unwrap();
        collector.lock();
        let err = collector.add(sample_record(ReasonCode::Hipaa18Name)).unwrap_err();
        assert!(matches!(err, AppError::CollectorLocked));
        assert_eq!(collector.records().len(), 1);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let collector = Collector::new();
        collector.add(sample_record(ReasonCode::Hipaa18Name)).unwrap();
        collector.add(sample_record(ReasonCode::Hipaa18Date)).unwrap();
        let records = collector.records();
        assert!(matches!(records[0].reason_code, ReasonCode::Hipaa18Name));
        assert!(matches!(records[1].reason_code, ReasonCode::Hipaa18Date));
    }
}
