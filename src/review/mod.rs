//! The review-gate state machine: detection → operator decisions →
//! sealed acceptance. Nothing downstream of `accept()` may mutate the
//! region set; `run::Pipeline` only ever exports the snapshot taken at
//! the moment of sealing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::Category;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegionSource {
    Detector,
    Operator,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegionStrength {
    Low,
    Medium,
    High,
    None,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Zone {
    Header,
    Footer,
    Body,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegionAction {
    Mask,
    Keep,
    Deleted,
    Unset,
}

/// Provenance recorded on a region created by `bulk_apply`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BulkProvenance {
    pub bulk_source_sop_uid: String,
    pub bulk_operation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub region_id: Uuid,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub source: RegionSource,
    pub detection_strength: RegionStrength,
    pub zone: Zone,
    pub default_action: RegionAction,
    pub reviewer_action: RegionAction,
    pub frame_index: i32,
    pub bulk_provenance: Option<BulkProvenance>,
}

impl Region {
    /// Whether this region's current reviewer decision authorises a mask.
    pub fn is_accepted_for_masking(&self) -> bool {
        matches!(self.reviewer_action, RegionAction::Mask)
    }
}

/// A target instance for `bulk_apply`: identity plus the classification
/// category the cross-modality-class check is enforced against.
#[derive(Debug, Clone)]
pub struct BulkTarget {
    pub sop_instance_uid: String,
    pub category: Category,
}

/// Where `bulk_apply` is permitted to expand to (Open Question (b)).
#[derive(Debug, Clone)]
pub enum BulkScope {
    SameSeries { targets: Vec<BulkTarget> },
    CrossSeries { targets: Vec<BulkTarget> },
}

/// A preflight finding recorded when detection could not run for some
/// part of the input (e.g. `DetectionUnavailable`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightFinding {
    pub sop_instance_uid: String,
    pub frame_index: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Created,
    Started,
    Accepted,
}

/// The review-gate state machine for one run.
pub struct Session {
    state: State,
    regions: HashMap<Uuid, Region>,
    preflight_findings: Vec<PreflightFinding>,
    file_uid_map: HashMap<String, (String, String)>, // filename -> (sop_uid, sop_class_uid)
    excluded_filenames: Vec<String>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            state: State::Created,
            regions: HashMap::new(),
            preflight_findings: Vec::new(),
            file_uid_map: HashMap::new(),
            excluded_filenames: Vec::new(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn is_sealed(&self) -> bool {
        self.state == State::Accepted
    }

    /// CREATED → STARTED. Requires at least one detection pass to have
    /// run, or the operator to have explicitly chosen manual mode.
    pub fn start(&mut self, detection_pass_ran: bool, manual_mode: bool) -> Result<(), AppError> {
        if self.state != State::Created {
            return Ok(()); // idempotent: already started (or further along)
        }
        if !detection_pass_ran && !manual_mode {
            return Err(AppError::PreflightFailed(
                "review session cannot start without a detection pass or explicit manual mode"
                    .to_string(),
            ));
        }
        self.state = State::Started;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), AppError> {
        if self.state == State::Accepted {
            return Err(AppError::SessionSealed);
        }
        Ok(())
    }

    pub fn add_region(&mut self, region: Region) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.regions.insert(region.region_id, region);
        Ok(())
    }

    /// Flip a region's reviewer action between `Mask` and `Keep`.
    pub fn toggle(&mut self, region_id: Uuid) -> Result<(), AppError> {
        self.ensure_mutable()?;
        let region = self
            .regions
            .get_mut(&region_id)
            .ok_or_else(|| AppError::PreflightFailed(format!("no such region {region_id}")))?;
        region.reviewer_action = match region.reviewer_action {
            RegionAction::Mask => RegionAction::Keep,
            _ => RegionAction::Mask,
        };
        Ok(())
    }

    pub fn delete_manual(&mut self, region_id: Uuid) -> Result<(), AppError> {
        self.ensure_mutable()?;
        if let Some(region) = self.regions.get_mut(&region_id) {
            if region.source == RegionSource::Operator {
                region.reviewer_action = RegionAction::Deleted;
            }
        }
        Ok(())
    }

    /// Expand `source_region` into one independent region per target.
    /// Expansion, never inheritance: each target gets its own region id
    /// and its own audit trail, all sharing the same bulk-operation id.
    ///
    /// Cross-modality-class bulk apply is rejected outright. Within a
    /// modality class, same-series expansion is always permitted;
    /// cross-series expansion requires the caller to have explicitly
    /// selected `BulkScope::CrossSeries` (Open Question (b): never
    /// inferred).
    pub fn bulk_apply(
        &mut self,
        source_region: &Region,
        source_category: Category,
        source_sop_uid: &str,
        scope: BulkScope,
    ) -> Result<Vec<Uuid>, AppError> {
        self.ensure_mutable()?;

        let targets = match &scope {
            BulkScope::SameSeries { targets } => targets,
            BulkScope::CrossSeries { targets } => targets,
        };

        for target in targets {
            if !same_modality_class(source_category, target.category) {
                return Err(AppError::PreflightFailed(format!(
                    "bulk apply rejected: {:?} cannot expand into {:?}",
                    source_category, target.category
                )));
            }
        }

        let bulk_operation_id = Uuid::new_v4();
        let mut created = Vec::with_capacity(targets.len());
        for target in targets {
            let region_id = Uuid::new_v4();
            let region = Region {
                region_id,
                bulk_provenance: Some(BulkProvenance {
                    bulk_source_sop_uid: source_sop_uid.to_string(),
                    bulk_operation_id,
                }),
                ..source_region.clone()
            };
            let _ = &target.sop_instance_uid; // target identity is carried by the caller's per-instance plan, not stored on the region itself
            self.regions.insert(region_id, region);
            created.push(region_id);
        }
        Ok(created)
    }

    /// STARTED → ACCEPTED (== SEALED). Fails if already accepted, and
    /// requires `start()` to have occurred.
    pub fn accept(&mut self) -> Result<(), AppError> {
        match self.state {
            State::Created => Err(AppError::PreflightFailed(
                "cannot accept a review session that was never started".to_string(),
            )),
            State::Accepted => Err(AppError::SessionSealed),
            State::Started => {
                self.state = State::Accepted;
                Ok(())
            }
        }
    }

    pub fn record_file_uid(&mut self, filename: &str, sop_uid: &str, sop_class_uid: &str) {
        self.file_uid_map.insert(
            filename.to_string(),
            (sop_uid.to_string(), sop_class_uid.to_string()),
        );
    }

    /// Resolve excluded filenames, verifying SOP-class match so a
    /// non-document file cannot be excluded via a document-scoped toggle.
    pub fn get_excluded_filenames(&self) -> &[String] {
        &self.excluded_filenames
    }

    pub fn exclude_filename(&mut self, filename: &str, expected_sop_class_prefix: &str) -> bool {
        match self.file_uid_map.get(filename) {
            Some((_, sop_class_uid)) if sop_class_uid.starts_with(expected_sop_class_prefix) => {
                self.excluded_filenames.push(filename.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn register_preflight_finding(&mut self, finding: PreflightFinding) {
        self.preflight_findings.push(finding);
    }

    pub fn preflight_findings(&self) -> &[PreflightFinding] {
        &self.preflight_findings
    }

    /// The accepted region snapshot. Only meaningful once `is_sealed()`.
    pub fn accepted_regions(&self) -> Vec<&Region> {
        self.regions
            .values()
            .filter(|r| !matches!(r.reviewer_action, RegionAction::Deleted | RegionAction::Unset))
            .collect()
    }

    /// Look up a region by id, regardless of its current reviewer
    /// decision. Used by callers (e.g. the run pipeline) to resolve the
    /// ids `bulk_apply` returns back into per-instance region lists.
    pub fn region(&self, region_id: Uuid) -> Option<&Region> {
        self.regions.get(&region_id)
    }

    pub fn accepted_regions_for_frame(&self, frame_index: i32) -> Vec<&Region> {
        self.accepted_regions()
            .into_iter()
            .filter(|r| r.frame_index == -1 || r.frame_index == frame_index)
            .collect()
    }
}

fn same_modality_class(a: Category, b: Category) -> bool {
    matches!(
        (a, b),
        (Category::Image, Category::Image)
            | (
                Category::Document | Category::StructuredReport | Category::EncapsulatedPdf,
                Category::Document | Category::StructuredReport | Category::EncapsulatedPdf
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(frame_index: i32) -> Region {
        Region {
            region_id: Uuid::new_v4(),
            x: 0,
            y: 0,
            w: 10,
            h: 10,
            source: RegionSource::Operator,
            detection_strength: RegionStrength::None,
            zone: Zone::Header,
            default_action: RegionAction::Mask,
            reviewer_action: RegionAction::Mask,
            frame_index,
            bulk_provenance: None,
        }
    }

    #[test]
    fn cannot_start_without_detection_pass_or_manual_mode() {
        let mut session = Session::new();
        assert!(session.start(false, false).is_err());
        assert!(session.start(false, true).is_ok());
    }

    #[test]
    fn add_region_after_accept_fails_sealed() {
        let mut session = Session::new();
        session.start(true, false).unwrap();
        session.add_region(region(-1)).unwrap();
        session.accept().unwrap();

        let region_count_before = session.accepted_regions().len();
        let err = session.add_region(region(0)).unwrap_err();
        assert!(matches!(err, AppError::SessionSealed));
        assert_eq!(session.accepted_regions().len(), region_count_before);
    }

    #[test]
    fn accept_requires_start_and_is_not_repeatable() {
        let mut session = Session::new();
        assert!(session.accept().is_err());
        session.start(true, false).unwrap();
        session.accept().unwrap();
        assert!(matches!(session.accept(), Err(AppError::SessionSealed)));
    }

    #[test]
    fn bulk_apply_rejects_cross_modality_class_expansion() {
        let mut session = Session::new();
        session.start(true, false).unwrap();
        let source = region(12);
        let targets = vec![BulkTarget {
            sop_instance_uid: "1.2.3".into(),
            category: Category::Document,
        }];
        let result = session.bulk_apply(
            &source,
            Category::Image,
            "1.2.3.source",
            BulkScope::SameSeries { targets },
        );
        assert!(result.is_err());
    }

    #[test]
    fn bulk_apply_creates_one_independent_region_per_target() {
        let mut session = Session::new();
        session.start(true, false).unwrap();
        let source = region(12);
        let targets: Vec<BulkTarget> = (0..43)
            .map(|i| BulkTarget {
                sop_instance_uid: format!("1.2.3.{i}"),
                category: Category::Image,
            })
            .collect();
        let created = session
            .bulk_apply(
                &source,
                Category::Image,
                "1.2.3.source",
                BulkScope::SameSeries { targets },
            )
            .unwrap();
        assert_eq!(created.len(), 43);
        for id in &created {
            let region = &session.regions[id];
            assert_eq!(
                region.bulk_provenance.as_ref().unwrap().bulk_source_sop_uid,
                "1.2.3.source"
            );
        }
        // Every created region shares the same bulk_operation_id.
        let ops: std::collections::HashSet<_> = created
            .iter()
            .map(|id| session.regions[id].bulk_provenance.as_ref().unwrap().bulk_operation_id)
            .collect();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn excluded_filename_requires_matching_sop_class_prefix() {
        let mut session = Session::new();
        session.record_file_uid("image.dcm", "1.2.3.4", "1.2.840.10008.5.1.4.1.1.2");
        session.record_file_uid("worksheet.dcm", "1.2.3.5", "1.2.840.10008.5.1.4.1.1.7");

        assert!(!session.exclude_filename("image.dcm", "1.2.840.10008.5.1.4.1.1.7"));
        assert!(session.exclude_filename("worksheet.dcm", "1.2.840.10008.5.1.4.1.1.7"));
        assert_eq!(session.get_excluded_filenames(), &["worksheet.dcm".to_string()]);
    }
}
