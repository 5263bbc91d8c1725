//! The declarative compliance engine: named profiles map onto per-tag
//! actions and a single pixel-action decision. `plan` is a pure function
//! — the engine itself carries no state machine.

pub mod profiles;

use dicom_core::Tag;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{Category, Object, SelectionScope};

/// One action the engine may take on a metadata tag.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TagAction {
    Remove,
    Replace(ReplaceStrategy),
    Retain,
    Shift { delta_days: i64 },
    Hash,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReplaceStrategy {
    /// Replace with a fixed literal value.
    Literal(String),
    /// Replace with an institution-scoped constant (e.g. "ANONYMOUS").
    Constant,
}

/// What, if anything, is authorised to happen to the pixel payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PixelActionPolicy {
    NotApplied,
    MaskAppliedIfRegions,
}

/// The resolved pixel-action decision for one object, computed by `plan`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum PixelAction {
    NotApplied,
    MaskApplied,
}

/// How study/series/instance UIDs are handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdentifierPolicy {
    Preserve,
    RegenerateDeterministic,
    RegenerateFresh,
}

/// Which field seeds the per-patient date-shift offset, chosen per profile
/// so the same patient always shifts by the same offset within that
/// profile's scope.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeySource {
    PatientId,
    StudyInstanceUid,
}

/// A single tag-level rule as evaluated against one object's tags.
#[derive(Debug, Clone)]
pub struct TagRule {
    pub tag: Tag,
    pub action: TagAction,
}

/// A named, immutable compliance configuration.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: &'static str,
    pub rules: Vec<TagRule>,
    pub always_preserve: Vec<Tag>,
    pub private_tag_default: TagAction,
    pub pixel_policy: PixelActionPolicy,
    pub identifier_policy: IdentifierPolicy,
    pub date_shift_window_days: Option<(i64, i64)>,
    pub date_shift_key_source: Option<KeySource>,
}

/// One tag-level action decision, carrying enough context for a decision
/// record without ever carrying the original value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub tag: Tag,
    pub action: TagAction,
}

/// The full output of `plan`: an ordered tag-action list plus the single
/// pixel-action decision for this object.
#[derive(Debug, Clone)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    pub pixel_action: PixelAction,
}

/// Optional research-study context, consumed only for reporting — it
/// never gates a compliance decision by itself.
#[derive(Debug, Clone, Default)]
pub struct ResearchContext {
    pub trial_id: Option<String>,
    pub site_id: Option<String>,
    pub subject_id: Option<String>,
}

/// Compute the per-tag plan and pixel-action decision for `obj` under
/// `profile`. Pure function: identical inputs yield identical plans.
pub fn plan(
    obj: &Object,
    profile: &Profile,
    selection_scope: &SelectionScope,
    _research_context: &ResearchContext,
    region_count: usize,
) -> Result<Plan, AppError> {
    let _ = selection_scope; // scope admission happens upstream of planning; kept for signature fidelity

    let mut actions = Vec::new();
    let mut ruled_tags = std::collections::HashSet::new();

    for rule in &profile.rules {
        ruled_tags.insert(rule.tag);
        // `Replace` adds a value regardless of whether the tag is already
        // present — `DeidentificationMethod` is virtually always absent on
        // source images, and the rule exists precisely to stamp it in, not
        // to rewrite an existing one. Every other action only makes sense
        // against a tag the object actually carries.
        let applies = matches!(rule.action, TagAction::Replace(_)) || obj.has(rule.tag);
        if applies {
            actions.push(PlannedAction {
                tag: rule.tag,
                action: rule.action.clone(),
            });
        }
    }

    for tag in obj.private_tags() {
        if profile.always_preserve.contains(&tag) {
            continue;
        }
        if !ruled_tags.contains(&tag) {
            actions.push(PlannedAction {
                tag,
                action: profile.private_tag_default.clone(),
            });
        }
    }

    let pixel_action = resolve_pixel_action(obj, profile, region_count);

    Ok(Plan {
        actions,
        pixel_action,
    })
}

fn resolve_pixel_action(obj: &Object, profile: &Profile, region_count: usize) -> PixelAction {
    let masking_allowed = matches!(profile.pixel_policy, PixelActionPolicy::MaskAppliedIfRegions);
    let is_image = obj.category() == Some(Category::Image);
    let regions_accepted = region_count > 0;

    if masking_allowed && is_image && regions_accepted {
        PixelAction::MaskApplied
    } else {
        PixelAction::NotApplied
    }
}

/// Mutate `obj` in place according to `plan`, the one place outside the
/// pure-planning function that actually touches tag values. `secret` and
/// `patient_key` feed `TagAction::Hash`/`Shift` resolution; which field
/// backs `patient_key` is the caller's responsibility (resolved from
/// `profile.date_shift_key_source` before this is called, since it must
/// be read from the object before any UID/identifier mutation occurs).
pub fn apply(obj: &mut Object, plan: &Plan, profile: &Profile, secret: &[u8], patient_key: &str) {
    for planned in &plan.actions {
        match &planned.action {
            TagAction::Remove => obj.remove(planned.tag),
            TagAction::Retain => {}
            TagAction::Replace(strategy) => {
                let value = match strategy {
                    ReplaceStrategy::Literal(s) => s.clone(),
                    ReplaceStrategy::Constant => "ANONYMOUS".to_string(),
                };
                obj.set_string(planned.tag, &value);
            }
            TagAction::Hash => {
                if let Some(original) = obj.get_string(planned.tag) {
                    if is_uid_tag(planned.tag) {
                        let remapped = crate::identity::derive_uid(secret, &original);
                        obj.set_uid(planned.tag, &remapped);
                    } else {
                        let remapped = crate::identity::derive_uid_key(secret, &original);
                        obj.set_string(planned.tag, &remapped);
                    }
                }
            }
            TagAction::Shift { .. } => {
                if let (Some(original), Some(window)) =
                    (obj.get_string(planned.tag), profile.date_shift_window_days)
                {
                    let offset = date_shift_offset(secret, patient_key, window);
                    if let Some(shifted) = shift_dicom_date(&original, offset) {
                        obj.set_date(planned.tag, &shifted);
                    }
                }
            }
        }
    }
}

/// Whether `tag` carries a `UI`-VR study/series/instance identifier,
/// as opposed to a free-text/`LO` identifier like `PatientID` that is
/// also hashed but must not be written back with VR `UI`.
pub(crate) fn is_uid_tag(tag: Tag) -> bool {
    tag == crate::model::tags::STUDY_INSTANCE_UID
        || tag == crate::model::tags::SERIES_INSTANCE_UID
        || tag == crate::model::tags::SOP_INSTANCE_UID
}

/// Shift a DICOM `DA`-format date (`YYYYMMDD`) by `offset_days`. Returns
/// `None` (leaving the tag untouched) if the value isn't a well-formed
/// DICOM date — a malformed date is a per-object parse concern, not
/// something the compliance engine should mask by silently fabricating
/// a value.
pub fn shift_dicom_date(value: &str, offset_days: i64) -> Option<String> {
    let trimmed = value.trim();
    let date = chrono::NaiveDate::parse_from_str(trimmed, "%Y%m%d").ok()?;
    let shifted = date.checked_add_signed(chrono::Duration::days(offset_days))?;
    Some(shifted.format("%Y%m%d").to_string())
}

/// Deterministically derive the per-patient date-shift offset (in days)
/// within `window`, seeded by `HMAC(secret, patient_key) mod window`.
pub fn date_shift_offset(secret: &[u8], patient_key: &str, window: (i64, i64)) -> i64 {
    let (low, high) = window;
    debug_assert!(low <= high);
    let span = (high - low + 1).max(1);
    let digest = crate::identity::hmac(secret, patient_key.as_bytes());
    // Take the low 8 hex chars (32 bits) of the HMAC as the PRF output.
    let n = u32::from_str_radix(&digest[..8], 16).unwrap_or(0) as i64;
    low + (n % span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_shift_offset_is_pure_and_deterministic() {
        let a = date_shift_offset(b"secret", "PATIENT-1", (-365, -30));
        let b = date_shift_offset(b"secret", "PATIENT-1", (-365, -30));
        assert_eq!(a, b);
        assert!(a >= -365 && a <= -30);
    }

    #[test]
    fn resolve_pixel_action_requires_image_profile_and_regions() {
        let profile = profiles::foi_legal();
        assert_eq!(profile.pixel_policy, PixelActionPolicy::MaskAppliedIfRegions);
    }
}
