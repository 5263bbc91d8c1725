//! The per-run pipeline: ingest → classify → plan → (mutate|passthrough)
//! → hash-verify → record, then ordering and the bundle commit.
//!
//! Per-object work runs on a bounded worker pool (`rayon`'s `par_iter`);
//! the Decision Collector is the single synchronisation point. A
//! pixel-invariant violation anywhere aborts the whole run closed — no
//! bundle commit — which is why per-object results are collected before
//! any of them are allowed to reach the bundle writer.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::compliance::{self, Plan};
use crate::config::RunConfig;
use crate::decisions::{Collector, Disposition, DispositionRecord, Record, ReasonCode, RegionRef, ScopeLevel, TargetType};
use crate::detection::{Adapter, PixelFrame, ZonePolicy};
use crate::error::{AppError, FailureReason};
use crate::evidence::{self, AppBuild, BundleInput, DetectionResultRow, ExceptionRow, ExceptionSeverity, LinkageRow, MaskedHashRow, MaskedIndexEntry, MaskingActionRow, RuntimeEnv, SourceHashRow, SourceIndexEntry, VerificationReport};
use crate::identity::hash_bytes;
use crate::ingest::{self, IngestCandidate};
use crate::model::{classify, tags, Category, Object, Triad};
use crate::ordering::{self, Entry as OrderingEntry};
use crate::pixel::{self, guard};
use crate::review::{BulkProvenance, Region, Session};

use super::{RunController, RunHandle};

/// Everything beyond `RunConfig` the pipeline needs that can't be derived
/// from the on-disk run layout: the detector, an optional sealed review
/// session, its region-to-instance mapping, and a cooperative
/// cancellation flag.
pub struct PipelineInput<'a> {
    pub detector: &'a dyn Adapter,
    pub review_session: Option<&'a Session>,
    /// Accepted mask regions, keyed by the *original* (pre-regeneration)
    /// SOP Instance UID they apply to. Built by the caller from
    /// `Session::bulk_apply`'s returned region ids zipped against its
    /// target list, since `Region` itself carries provenance but not a
    /// target identity.
    pub regions_by_sop_uid: HashMap<String, Vec<Region>>,
    pub cancellation: Arc<AtomicBool>,
}

pub struct PipelineOutcome {
    pub bundle_path: PathBuf,
    pub exported: usize,
    pub skipped_unsupported: usize,
    pub excluded_by_scope: usize,
    pub failed: usize,
}

struct ObjectResult {
    source_label: String,
    disposition: Disposition,
    disposition_reason: Option<String>,
    source_index_entry: Option<SourceIndexEntry>,
    source_hash_row: Option<SourceHashRow>,
    exported: Option<ExportedObject>,
    decisions: Vec<Record>,
    detection_rows: Vec<DetectionResultRow>,
    masking_rows: Vec<MaskingActionRow>,
    exceptions: Vec<ExceptionRow>,
}

struct ExportedObject {
    triad: Triad,
    masked_triad: Triad,
    series_category: Category,
    bytes: Vec<u8>,
    masked_pixel_hash: String,
    instance_number: Option<i32>,
    acquisition_time: Option<String>,
    uid_strategy: &'static str,
}

/// Run the full pipeline for one opened run. Consumes `handle`: on
/// success it is handed to `RunController::complete`; on a run-fatal
/// error it is handed to `RunController::fail` and the error propagated.
pub fn run(
    controller: &RunController,
    handle: RunHandle,
    config: &RunConfig,
    input: PipelineInput<'_>,
) -> Result<PipelineOutcome, AppError> {
    let profile = match crate::compliance::profiles::resolve(&config.profile_name) {
        Ok(p) => p,
        Err(e) => {
            controller.fail(handle, FailureReason::ProfileUnknown)?;
            return Err(e);
        }
    };

    match run_inner(controller, &handle, config, profile, &input) {
        Ok(outcome) => {
            controller.complete(handle)?;
            Ok(outcome)
        }
        Err(e) => {
            let reason = e
                .as_failure_reason()
                .unwrap_or(FailureReason::Preflight("unclassified".to_string()));
            controller.fail(handle, reason)?;
            Err(e)
        }
    }
}

fn run_inner(
    _controller: &RunController,
    handle: &RunHandle,
    config: &RunConfig,
    profile: &crate::compliance::Profile,
    input: &PipelineInput<'_>,
) -> Result<PipelineOutcome, AppError> {
    if input.cancellation.load(Ordering::Acquire) {
        return Err(AppError::Cancelled);
    }

    let candidates = ingest::collect(&config.input_path)?;
    if candidates.is_empty() {
        return Err(AppError::SelectionEmpty);
    }

    let collector = Collector::new();

    let secret = config.salt.as_bytes();
    let results: Vec<ObjectResult> = candidates
        .par_iter()
        .enumerate()
        .map(|(source_index, candidate)| {
            process_candidate(
                source_index,
                candidate,
                profile,
                &config.selection_scope,
                secret,
                config.detection_options.zone_policy,
                input,
            )
        })
        .collect::<Result<Vec<ObjectResult>, AppError>>()?;

    if input.cancellation.load(Ordering::Acquire) {
        return Err(AppError::Cancelled);
    }

    // Duplicate-triad enforcement: the first sighting of a triad wins;
    // later ones are demoted to FAILED and excluded from export.
    let mut seen_triads: HashSet<Triad> = HashSet::new();
    let mut exported = Vec::new();
    let mut exceptions = Vec::new();
    let mut source_index_rows = Vec::new();
    let mut source_hash_rows = Vec::new();
    let mut detection_rows = Vec::new();
    let mut masking_rows = Vec::new();
    let mut skipped_unsupported = 0usize;
    let mut excluded_by_scope = 0usize;
    let mut failed = 0usize;

    for result in results {
        for d in result.decisions {
            collector.add(d)?;
        }
        detection_rows.extend(result.detection_rows);
        masking_rows.extend(result.masking_rows);
        exceptions.extend(result.exceptions);
        if let Some(row) = result.source_index_entry {
            source_index_rows.push(row);
        }
        if let Some(row) = result.source_hash_row {
            source_hash_rows.push(row);
        }

        let mut disposition = result.disposition;
        let mut exported_obj = result.exported;

        if let Some(obj) = &exported_obj {
            if !seen_triads.insert(obj.triad.clone()) {
                disposition = Disposition::Failed;
                exceptions.push(ExceptionRow {
                    sop_instance_uid: Some(obj.triad.sop_instance_uid.clone()),
                    severity: ExceptionSeverity::Error,
                    message: "duplicate (study, series, instance) triad within this run"
                        .to_string(),
                });
                exported_obj = None;
            }
        }

        match disposition {
            Disposition::Exported => {
                if let Some(obj) = exported_obj {
                    exported.push(obj);
                } else {
                    failed += 1;
                }
            }
            Disposition::SkippedUnsupported => skipped_unsupported += 1,
            Disposition::ExcludedByScope => excluded_by_scope += 1,
            Disposition::Failed => failed += 1,
        }

        collector.record_disposition(DispositionRecord {
            sop_instance_uid: result.source_label.clone(),
            disposition,
            reason: result.disposition_reason,
            timestamp: chrono::Utc::now(),
        })?;
    }

    info!(
        exported = exported.len(),
        skipped_unsupported,
        excluded_by_scope,
        failed,
        "per-object pipeline phase complete"
    );

    // Export ordering, grouped by the series the exported object belongs
    // to (using the masked series uid, since that is what governs the
    // output directory layout).
    let mut by_series: HashMap<String, Vec<(usize, ExportedObject)>> = HashMap::new();
    for (i, obj) in exported.into_iter().enumerate() {
        by_series
            .entry(obj.masked_triad.series_instance_uid.clone())
            .or_default()
            .push((i, obj));
    }

    let mut masked_index = Vec::new();
    let mut masked_hashes = Vec::new();
    let mut instance_linkage = Vec::new();
    let output_root = &config.output_root;
    std::fs::create_dir_all(output_root)?;

    let mut series_uids: Vec<&String> = by_series.keys().collect();
    series_uids.sort();
    for series_uid in series_uids {
        let members = by_series.remove(series_uid).unwrap();
        let entries: Vec<OrderingEntry> = members
            .iter()
            .map(|(source_index, obj)| OrderingEntry {
                source_index: *source_index,
                sop_instance_uid: obj.masked_triad.sop_instance_uid.clone(),
                instance_number: obj.instance_number,
                frame_number: None,
                acquisition_time: obj.acquisition_time.clone(),
            })
            .collect();
        let order = ordering::order(entries);

        let mut by_uid: HashMap<String, &ExportedObject> = members
            .iter()
            .map(|(_, obj)| (obj.masked_triad.sop_instance_uid.clone(), obj))
            .collect();

        let series_dir = sanitize_component(series_uid);
        for position in &order.positions {
            let obj = by_uid
                .remove(&position.entry.sop_instance_uid)
                .expect("ordering never invents an entry");

            let file_name = format!(
                "{:04}_{}.dcm",
                position.position,
                sanitize_component(&obj.masked_triad.sop_instance_uid)
            );
            let rel_path = PathBuf::from(&series_dir).join(&file_name);
            let full_path = output_root.join(&rel_path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, &obj.bytes)?;

            masked_index.push(MaskedIndexEntry {
                masked_path: rel_path.to_string_lossy().replace('\\', "/"),
                sop_instance_uid: obj.masked_triad.sop_instance_uid.clone(),
                disposition: "EXPORTED".to_string(),
                category: obj.series_category.to_string(),
            });
            masked_hashes.push(MaskedHashRow {
                masked_sop_instance_uid: obj.masked_triad.sop_instance_uid.clone(),
                masked_pixel_hash: obj.masked_pixel_hash.clone(),
            });
            instance_linkage.push(LinkageRow {
                source_study_uid: obj.triad.study_instance_uid.clone(),
                source_series_uid: obj.triad.series_instance_uid.clone(),
                source_sop_uid: obj.triad.sop_instance_uid.clone(),
                masked_study_uid: obj.masked_triad.study_instance_uid.clone(),
                masked_series_uid: obj.masked_triad.series_instance_uid.clone(),
                masked_sop_uid: obj.masked_triad.sop_instance_uid.clone(),
                uid_strategy: obj.uid_strategy.to_string(),
                deterministic_salt_id: config.salt.opaque_id(),
            });
        }

        if !order.reorder_log.is_empty() {
            info!(
                series_uid = %series_uid,
                reorders = order.reorder_log.len(),
                "export order differs from ingest order for this series"
            );
        }
    }

    let verification_report = VerificationReport {
        total_ingested: candidates.len(),
        exported: masked_index.len(),
        skipped_unsupported,
        excluded_by_scope,
        failed,
        pixel_invariant_checks_passed: masked_index.len() + skipped_unsupported + excluded_by_scope,
        pixel_invariant_checks_failed: 0,
    };

    // Commit point: the decision collector is locked only now, after the
    // output archive has been fully materialised on disk but before the
    // bundle write (which is itself the audit "commit") and before the
    // run status ever flips to completed.
    collector.lock();

    let bundle_input = BundleInput {
        profile_name: profile.name.to_string(),
        app_build: AppBuild {
            version: handle.context.build_fingerprint.version.clone(),
            commit: handle.context.build_fingerprint.commit.clone(),
            config_hash: handle.context.build_fingerprint.config_hash.clone(),
        },
        runtime_env: RuntimeEnv {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        },
        source_index: source_index_rows,
        source_hashes: source_hash_rows,
        masked_index,
        masked_hashes,
        detection_results: detection_rows,
        masking_actions: masking_rows,
        decision_log: collector.records(),
        dispositions: collector.dispositions(),
        instance_linkage,
        exceptions,
        verification_report,
    };

    let bundle_path = evidence::write_bundle(
        &handle.context.paths.bundle,
        &handle.context.paths.tmp,
        &handle.context.run_id,
        handle.context.started_at,
        &bundle_input,
    )?;

    Ok(PipelineOutcome {
        bundle_path,
        exported: bundle_input_exported_count(&verification_report),
        skipped_unsupported,
        excluded_by_scope,
        failed,
    })
}

fn bundle_input_exported_count(report: &VerificationReport) -> usize {
    report.exported
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

fn process_candidate(
    _source_index: usize,
    candidate: &IngestCandidate,
    profile: &crate::compliance::Profile,
    scope: &crate::model::SelectionScope,
    secret: &[u8],
    zone_policy: ZonePolicy,
    input: &PipelineInput<'_>,
) -> Result<ObjectResult, AppError> {
    let path = PathBuf::from(&candidate.label);

    if !ingest::probe_dicom_magic(&candidate.bytes) {
        return Ok(unsupported_result(&candidate.label, "not a DICOM object (no DICM magic)"));
    }

    let mut obj = match Object::load(&candidate.bytes, &path) {
        Ok(o) => o,
        Err(AppError::Parse { kind, .. }) => {
            return Ok(unsupported_result(&candidate.label, &kind.to_string()));
        }
        Err(_) => return Ok(unsupported_result(&candidate.label, "parse failed")),
    };

    let category = classify::classify(&obj, true);
    obj.set_category(category);

    if !scope.admits(category) {
        let reason = scope_exclusion_reason(category, classify::is_worksheet(&obj));
        let mut decisions = Vec::new();
        decisions.push(Record {
            scope_level: ScopeLevel::Instance,
            scope_uid: obj.triad.sop_instance_uid.clone(),
            target_type: TargetType::Object,
            target_name: "disposition".to_string(),
            action: "EXCLUDED_BY_SCOPE".to_string(),
            reason_code: reason,
            rule_source: profile.name.to_string(),
            region: None,
            hash_before: None,
            hash_after: None,
            timestamp: chrono::Utc::now(),
        });
        return Ok(ObjectResult {
            source_label: obj.triad.sop_instance_uid.clone(),
            disposition: Disposition::ExcludedByScope,
            disposition_reason: Some(format!("{reason:?}")),
            source_index_entry: Some(source_index_entry(&obj, &candidate.label)),
            source_hash_row: None,
            exported: None,
            decisions,
            detection_rows: Vec::new(),
            masking_rows: Vec::new(),
            exceptions: Vec::new(),
        });
    }

    let original_triad = obj.triad.clone();
    let original_pixel_hash = hash_bytes(obj.pixel_bytes());
    let original_transfer_syntax = obj.transfer_syntax_uid.clone();
    let original_patient_id = obj.get_string(tags::PATIENT_ID);

    let region_count = accepted_region_count(input, &original_triad.sop_instance_uid);
    let plan = match compliance::plan(
        &obj,
        profile,
        scope,
        &crate::compliance::ResearchContext::default(),
        region_count,
    ) {
        Ok(p) => p,
        Err(e) => {
            return Ok(unsupported_result(&candidate.label, &e.to_string()));
        }
    };

    let patient_key = match profile.date_shift_key_source {
        Some(crate::compliance::KeySource::PatientId) => {
            original_patient_id.clone().unwrap_or_default()
        }
        Some(crate::compliance::KeySource::StudyInstanceUid) | None => {
            original_triad.study_instance_uid.clone()
        }
    };

    let mut decisions = decision_records_for_plan(&plan, profile, &original_triad.sop_instance_uid);
    compliance::apply(&mut obj, &plan, profile, secret, &patient_key);

    let mut masking_rows = Vec::new();
    if let Plan {
        pixel_action: crate::compliance::PixelAction::MaskApplied,
        ..
    } = &plan
    {
        let regions = input
            .regions_by_sop_uid
            .get(&original_triad.sop_instance_uid)
            .cloned()
            .unwrap_or_default();
        let accepted: Vec<Region> = regions
            .into_iter()
            .filter(|r| r.is_accepted_for_masking())
            .collect();
        let width = obj.columns() as usize;
        let height = obj.rows() as usize;
        let frame_count = obj.number_of_frames() as usize;
        pixel::apply_regions(&mut obj, &accepted, width, height, frame_count.max(1));

        for region in &accepted {
            masking_rows.push(MaskingActionRow {
                sop_instance_uid: obj.triad.sop_instance_uid.clone(),
                region_id: region.region_id,
                bulk_apply_source: region
                    .bulk_provenance
                    .as_ref()
                    .map(|p: &BulkProvenance| p.bulk_source_sop_uid.clone()),
                bulk_apply_id: region.bulk_provenance.as_ref().map(|p| p.bulk_operation_id),
            });
            decisions.push(Record {
                scope_level: ScopeLevel::Instance,
                scope_uid: original_triad.sop_instance_uid.clone(),
                target_type: TargetType::Pixel,
                target_name: "PixelData".to_string(),
                action: "MASK_APPLIED".to_string(),
                reason_code: ReasonCode::UserMaskRegionSelected,
                rule_source: profile.name.to_string(),
                region: Some(RegionRef {
                    region_id: region.region_id,
                    x: region.x,
                    y: region.y,
                    w: region.w,
                    h: region.h,
                    frame_index: region.frame_index,
                }),
                hash_before: None,
                hash_after: None,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    // A detection pass runs over every image regardless of whether masking
    // ends up applied, so the evidence trail records what was scanned even
    // when the operator's sealed review accepted nothing for this instance.
    let mut detection_rows = Vec::new();
    let mut object_exceptions = Vec::new();
    if category == Category::Image
        && matches!(
            profile.pixel_policy,
            crate::compliance::PixelActionPolicy::MaskAppliedIfRegions
        )
    {
        let width = obj.columns() as usize;
        let height = obj.rows() as usize;
        let frame_count = (obj.number_of_frames() as usize).max(1);
        let frame_len = width * height;
        let pixel_bytes = obj.pixel_bytes().to_vec();
        for frame_index in 0..frame_count {
            let start = (frame_index * frame_len).min(pixel_bytes.len());
            let end = (start + frame_len).min(pixel_bytes.len());
            let frame = PixelFrame {
                bytes: &pixel_bytes[start..end],
                width,
                height,
                frame_index: frame_index as i32,
            };
            match input.detector.detect(&frame, &obj.modality, zone_policy) {
                Ok(regions) => {
                    for region in &regions {
                        detection_rows.push(DetectionResultRow {
                            source_sop_uid: original_triad.sop_instance_uid.clone(),
                            frame_index: region.frame_index,
                            region_id: region.region_id,
                            bbox: (region.x, region.y, region.w, region.h),
                            confidence_bucket: format!("{:?}", region.detection_strength),
                            engine: "configured_adapter".to_string(),
                            engine_version: "n/a".to_string(),
                            ruleset_id: profile.name.to_string(),
                            config_hash: String::new(),
                        });
                    }
                }
                Err(e) => {
                    object_exceptions.push(ExceptionRow {
                        sop_instance_uid: Some(original_triad.sop_instance_uid.clone()),
                        severity: ExceptionSeverity::Warning,
                        message: format!("detection pass failed on frame {frame_index}: {e}"),
                    });
                }
            }
        }
    }

    let masked_pixel_hash = hash_bytes(obj.pixel_bytes());
    if let Err(e) = guard::enforce_passthrough_hashes(
        &original_triad.sop_instance_uid,
        original_pixel_hash.clone(),
        &original_transfer_syntax,
        masked_pixel_hash.clone(),
        &obj.transfer_syntax_uid,
        plan.pixel_action,
    ) {
        // Run-fatal per the guard's own contract: propagate instead of
        // demoting this object to a per-object skip. The caller aborts the
        // whole run closed, and no bundle is ever committed.
        error!(sop_instance_uid = %original_triad.sop_instance_uid, "pixel invariant violated");
        return Err(e);
    }

    let masked_triad = obj.triad.clone();
    let uid_strategy = match profile.identifier_policy {
        crate::compliance::IdentifierPolicy::Preserve => "preserve",
        crate::compliance::IdentifierPolicy::RegenerateDeterministic => "deterministic",
        crate::compliance::IdentifierPolicy::RegenerateFresh => "fresh",
    };

    let instance_number = obj.instance_number();
    let acquisition_time = obj.acquisition_time();

    let bytes = match obj.write() {
        Ok(b) => b,
        Err(e) => return Ok(unsupported_result(&candidate.label, &e.to_string())),
    };

    let source_hash_row = SourceHashRow {
        source_sop_instance_uid: original_triad.sop_instance_uid.clone(),
        source_pixel_hash: original_pixel_hash,
        source_series_uid: original_triad.series_instance_uid.clone(),
        instance_number,
    };
    let source_index_row = source_index_entry(&obj, &candidate.label);

    Ok(ObjectResult {
        source_label: original_triad.sop_instance_uid.clone(),
        disposition: Disposition::Exported,
        disposition_reason: None,
        source_index_entry: Some(source_index_row),
        source_hash_row: Some(source_hash_row),
        exported: Some(ExportedObject {
            triad: original_triad,
            masked_triad,
            series_category: category,
            bytes,
            masked_pixel_hash,
            instance_number,
            acquisition_time,
            uid_strategy,
        }),
        decisions,
        detection_rows,
        masking_rows,
        exceptions: object_exceptions,
    })
}

fn accepted_region_count(input: &PipelineInput<'_>, sop_uid: &str) -> usize {
    let sealed = input.review_session.map(|s| s.is_sealed()).unwrap_or(false);
    if !sealed {
        return 0;
    }
    input
        .regions_by_sop_uid
        .get(sop_uid)
        .map(|regions| regions.iter().filter(|r| r.is_accepted_for_masking()).count())
        .unwrap_or(0)
}

/// Which reason code to attach when `scope` rejects `category`. A
/// worksheet (a `Document`-classified object whose series description or
/// image type carries the WORKSHEET/REPORT keyword) is called out
/// separately from a plain document-category exclusion, since an operator
/// reviewing the decision log needs to know whether the object was
/// recognised as a worksheet or simply fell outside the selected scope.
fn scope_exclusion_reason(category: Category, is_worksheet: bool) -> ReasonCode {
    if category == Category::Document && is_worksheet {
        ReasonCode::WorksheetDetected
    } else {
        ReasonCode::ScopeDocumentsExcluded
    }
}

fn unsupported_result(label: &str, reason: &str) -> ObjectResult {
    warn!(label, reason, "object skipped as unsupported");
    ObjectResult {
        source_label: label.to_string(),
        disposition: Disposition::SkippedUnsupported,
        disposition_reason: Some(reason.to_string()),
        source_index_entry: None,
        source_hash_row: None,
        exported: None,
        decisions: Vec::new(),
        detection_rows: Vec::new(),
        masking_rows: Vec::new(),
        exceptions: vec![ExceptionRow {
            sop_instance_uid: None,
            severity: ExceptionSeverity::Error,
            message: format!("{label}: {reason}"),
        }],
    }
}

fn source_index_entry(obj: &Object, source_path: &str) -> SourceIndexEntry {
    SourceIndexEntry {
        source_path: source_path.to_string(),
        sop_instance_uid: obj.triad.sop_instance_uid.clone(),
        series_instance_uid: obj.triad.series_instance_uid.clone(),
        study_instance_uid: obj.triad.study_instance_uid.clone(),
        sop_class_uid: obj.sop_class_uid.clone(),
    }
}

/// A best-effort reason-code mapping for each planned tag action, used
/// for the per-tag decision records. The mapping favours the specific
/// FOI/HIPAA codes over the generic ones wherever the tag identity makes
/// the intent unambiguous.
fn decision_records_for_plan(
    plan: &Plan,
    profile: &crate::compliance::Profile,
    scope_uid: &str,
) -> Vec<Record> {
    plan.actions
        .iter()
        .map(|planned| {
            let reason = reason_code_for(planned.tag, &planned.action, profile);
            Record {
                scope_level: ScopeLevel::Instance,
                scope_uid: scope_uid.to_string(),
                target_type: TargetType::Tag,
                target_name: format!("{:04X},{:04X}", planned.tag.group(), planned.tag.element()),
                action: format!("{:?}", planned.action),
                reason_code: reason,
                rule_source: profile.name.to_string(),
                region: None,
                hash_before: None,
                hash_after: None,
                timestamp: chrono::Utc::now(),
            }
        })
        .collect()
}

fn reason_code_for(
    tag: dicom_core::Tag,
    action: &crate::compliance::TagAction,
    profile: &crate::compliance::Profile,
) -> ReasonCode {
    use crate::compliance::TagAction;

    let is_foi = profile.name.starts_with("foi_");
    let is_physician_tag =
        tag == tags::REFERRING_PHYSICIAN_NAME || tag == tags::NAME_OF_PHYSICIANS_READING_STUDY;
    let is_uid_tag = crate::compliance::is_uid_tag(tag);
    let is_patient_core_tag =
        tag == tags::PATIENT_NAME || tag == tags::PATIENT_ID || tag == tags::PATIENT_BIRTH_DATE;
    let is_private = tag.group() % 2 == 1;

    match action {
        TagAction::Hash if is_uid_tag => ReasonCode::DicomPs315UidRemap,
        TagAction::Shift { .. } => ReasonCode::DicomPs315DateShift,
        TagAction::Remove if is_private => ReasonCode::DicomPs315PrivateTag,
        TagAction::Remove if is_physician_tag && is_foi => ReasonCode::FoiStaffRedaction,
        TagAction::Remove if is_physician_tag => ReasonCode::Hipaa18Name,
        TagAction::Remove => ReasonCode::Hipaa18Name,
        TagAction::Retain if is_patient_core_tag && profile.name == "foi_patient" => {
            ReasonCode::FoiPreservePatient
        }
        TagAction::Retain if is_uid_tag && is_foi => ReasonCode::FoiChainOfCustody,
        TagAction::Retain => ReasonCode::SystemWhitelistRetained,
        TagAction::Replace(_) => ReasonCode::SystemDiagnosticPreserved,
        TagAction::Hash => ReasonCode::UserOverrideRetained,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{profiles, IdentifierPolicy, KeySource, ResearchContext};
    use crate::identity::hash_bytes;
    use crate::model::{tags, Object, SelectionScope, Triad};

    fn research_candidate() -> Object {
        let mut obj = Object::test_only_stub(
            Triad {
                study_instance_uid: "1.2.3.study".into(),
                series_instance_uid: "1.2.3.series".into(),
                sop_instance_uid: "1.2.3.instance".into(),
            },
            "1.2.840.10008.1.2.1".into(),
            vec![1, 2, 3, 4],
        );
        obj.set_string(tags::PATIENT_NAME, "DOE^JANE");
        obj.set_string(tags::PATIENT_ID, "MRN-0042");
        obj.set_string(tags::PATIENT_BIRTH_DATE, "19800615");
        obj
    }

    // Scenario: a single research-distribution object with no operator
    // regions selected. Direct identifiers are removed, the birth date is
    // shifted within the profile's window, study/series/instance UIDs are
    // deterministically remapped, the pixel payload is untouched, and the
    // method-literal tag records which de-identification method was used.
    #[test]
    fn research_safe_harbor_plan_and_apply_matches_the_documented_contract() {
        let mut obj = research_candidate();
        let profile = profiles::research_safe_harbor();
        let secret = b"a-run-scoped-secret";

        let original_pixel_hash = hash_bytes(obj.pixel_bytes());
        let original_transfer_syntax = obj.transfer_syntax_uid.clone();
        let original_study_uid = obj.triad.study_instance_uid.clone();
        let patient_key = obj.get_string(tags::PATIENT_ID).unwrap();

        let plan = compliance::plan(&obj, &profile, &SelectionScope::default(), &ResearchContext::default(), 0)
            .expect("plan succeeds for a well-formed object");
        assert_eq!(plan.pixel_action, crate::compliance::PixelAction::NotApplied);

        compliance::apply(&mut obj, &plan, &profile, secret, &patient_key);

        assert!(obj.get_string(tags::PATIENT_NAME).is_none());
        assert_eq!(
            obj.get_string(tags::DEIDENTIFICATION_METHOD).as_deref(),
            Some("HIPAA_SAFE_HARBOR")
        );

        let shifted = obj
            .get_string(tags::PATIENT_BIRTH_DATE)
            .expect("birth date is shifted, not removed");
        let original_date = chrono::NaiveDate::parse_from_str("19800615", "%Y%m%d").unwrap();
        let shifted_date = chrono::NaiveDate::parse_from_str(&shifted, "%Y%m%d")
            .expect("shifted date is still well-formed");
        let delta = (shifted_date - original_date).num_days();
        assert!((-365..=-30).contains(&delta), "delta {delta} outside the profile window");

        assert_ne!(obj.get_string(tags::STUDY_INSTANCE_UID).unwrap(), original_study_uid);
        assert_eq!(profile.identifier_policy, IdentifierPolicy::RegenerateDeterministic);
        assert_eq!(profile.date_shift_key_source, Some(KeySource::PatientId));

        let masked_pixel_hash = hash_bytes(obj.pixel_bytes());
        assert_eq!(masked_pixel_hash, original_pixel_hash);
        assert!(guard::enforce_passthrough_hashes(
            "1.2.3.instance",
            original_pixel_hash,
            &original_transfer_syntax,
            masked_pixel_hash,
            &obj.transfer_syntax_uid,
            plan.pixel_action,
        )
        .is_ok());
    }

    // Running the same object through the same profile and secret twice
    // must remap the study UID to the same value both times, which is
    // what lets a repeat export of the same study stay correlatable.
    #[test]
    fn research_safe_harbor_uid_remap_is_stable_across_runs() {
        let profile = profiles::research_safe_harbor();
        let secret = b"a-run-scoped-secret";

        let mut first = research_candidate();
        let key = first.get_string(tags::PATIENT_ID).unwrap();
        let plan = compliance::plan(&first, &profile, &SelectionScope::default(), &ResearchContext::default(), 0).unwrap();
        compliance::apply(&mut first, &plan, &profile, secret, &key);

        let mut second = research_candidate();
        let plan = compliance::plan(&second, &profile, &SelectionScope::default(), &ResearchContext::default(), 0).unwrap();
        compliance::apply(&mut second, &plan, &profile, secret, &key);

        assert_eq!(
            first.get_string(tags::STUDY_INSTANCE_UID),
            second.get_string(tags::STUDY_INSTANCE_UID)
        );
    }

    #[test]
    fn scope_exclusion_reason_flags_worksheets_distinctly_from_plain_documents() {
        assert_eq!(
            scope_exclusion_reason(Category::Document, true),
            ReasonCode::WorksheetDetected
        );
        assert_eq!(
            scope_exclusion_reason(Category::Document, false),
            ReasonCode::ScopeDocumentsExcluded
        );
        // An encapsulated PDF never carries the worksheet flag, regardless
        // of the `is_worksheet` probe result, since that probe only ever
        // runs against `Document`-classified objects upstream.
        assert_eq!(
            scope_exclusion_reason(Category::EncapsulatedPdf, false),
            ReasonCode::ScopeDocumentsExcluded
        );
    }

    #[test]
    fn reason_code_for_favours_specific_codes_over_generic_ones() {
        let research = profiles::research_safe_harbor();
        assert_eq!(
            reason_code_for(tags::STUDY_INSTANCE_UID, &compliance::TagAction::Hash, &research),
            ReasonCode::DicomPs315UidRemap
        );
        assert_eq!(
            reason_code_for(
                tags::PATIENT_BIRTH_DATE,
                &compliance::TagAction::Shift { delta_days: 0 },
                &research
            ),
            ReasonCode::DicomPs315DateShift
        );

        let foi = profiles::foi_legal();
        assert_eq!(
            reason_code_for(tags::REFERRING_PHYSICIAN_NAME, &compliance::TagAction::Remove, &foi),
            ReasonCode::FoiStaffRedaction
        );
        assert_eq!(
            reason_code_for(tags::STUDY_INSTANCE_UID, &compliance::TagAction::Retain, &foi),
            ReasonCode::FoiChainOfCustody
        );

        let foi_patient = profiles::foi_patient();
        assert_eq!(
            reason_code_for(tags::PATIENT_NAME, &compliance::TagAction::Retain, &foi_patient),
            ReasonCode::FoiPreservePatient
        );
    }

    #[test]
    fn sanitize_component_replaces_only_non_uid_safe_characters() {
        assert_eq!(sanitize_component("1.2.840.113619-5"), "1.2.840.113619-5");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
    }

    #[test]
    fn accepted_region_count_is_zero_until_the_review_session_is_sealed() {
        use crate::review::{Region, RegionAction, RegionSource, RegionStrength, Zone};
        use std::collections::HashMap;
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;
        use uuid::Uuid;

        let region = Region {
            region_id: Uuid::nil(),
            x: 0,
            y: 0,
            w: 1,
            h: 1,
            source: RegionSource::Operator,
            detection_strength: RegionStrength::None,
            zone: Zone::Body,
            default_action: RegionAction::Mask,
            reviewer_action: RegionAction::Mask,
            frame_index: -1,
            bulk_provenance: None,
        };
        let mut regions_by_sop_uid = HashMap::new();
        regions_by_sop_uid.insert("1.2.3.instance".to_string(), vec![region]);

        let detector = crate::detection::NullAdapter;
        let input = PipelineInput {
            detector: &detector,
            review_session: None,
            regions_by_sop_uid,
            cancellation: Arc::new(AtomicBool::new(false)),
        };
        assert_eq!(accepted_region_count(&input, "1.2.3.instance"), 0);
    }
}
