//! The closed set of named compliance profiles. Each profile is built by
//! its own constructor function and assembled into a registry exactly
//! once via `OnceLock`, so the static configuration is compiled once and
//! shared immutably for the lifetime of the process.

use std::collections::HashMap;
use std::sync::OnceLock;

use dicom_core::Tag;

use crate::error::AppError;
use crate::model::tags;

use super::{IdentifierPolicy, KeySource, PixelActionPolicy, Profile, ReplaceStrategy, TagAction, TagRule};

/// The closed set of recognised profile names.
pub const PROFILE_NAMES: &[&str] = &[
    "internal_repair",
    "research_safe_harbor",
    "strict_oaic",
    "foi_legal",
    "foi_patient",
];

fn rule(tag: Tag, action: TagAction) -> TagRule {
    TagRule { tag, action }
}

/// `internal_repair`: minimal changes for engineering triage of a
/// malfunctioning device. UIDs and dates are preserved so the instance
/// can still be correlated against the source system during debugging;
/// only direct patient-name identifiers are removed.
pub fn internal_repair() -> Profile {
    Profile {
        name: "internal_repair",
        rules: vec![
            rule(tags::PATIENT_NAME, TagAction::Remove),
            rule(tags::PATIENT_ID, TagAction::Retain),
            rule(tags::PATIENT_BIRTH_DATE, TagAction::Retain),
            rule(tags::STUDY_INSTANCE_UID, TagAction::Retain),
            rule(tags::SERIES_INSTANCE_UID, TagAction::Retain),
            rule(tags::SOP_INSTANCE_UID, TagAction::Retain),
            rule(tags::ACCESSION_NUMBER, TagAction::Retain),
        ],
        always_preserve: vec![tags::STUDY_INSTANCE_UID, tags::SERIES_INSTANCE_UID],
        private_tag_default: TagAction::Remove,
        pixel_policy: PixelActionPolicy::NotApplied,
        identifier_policy: IdentifierPolicy::Preserve,
        date_shift_window_days: None,
        date_shift_key_source: None,
    }
}

/// `research_safe_harbor`: HIPAA Safe Harbor de-identification for
/// research distribution. Direct identifiers removed, dates shifted by a
/// per-patient offset, UIDs re-mapped deterministically so repeat exports
/// of the same study stay correlatable within the research environment.
pub fn research_safe_harbor() -> Profile {
    Profile {
        name: "research_safe_harbor",
        rules: vec![
            rule(tags::PATIENT_NAME, TagAction::Remove),
            rule(tags::PATIENT_ID, TagAction::Hash),
            rule(
                tags::PATIENT_BIRTH_DATE,
                TagAction::Shift { delta_days: 0 }, // resolved per-patient at apply time
            ),
            rule(tags::ACCESSION_NUMBER, TagAction::Remove),
            rule(tags::REFERRING_PHYSICIAN_NAME, TagAction::Remove),
            rule(tags::NAME_OF_PHYSICIANS_READING_STUDY, TagAction::Remove),
            rule(
                tags::DEIDENTIFICATION_METHOD,
                TagAction::Replace(ReplaceStrategy::Literal("HIPAA_SAFE_HARBOR".to_string())),
            ),
            rule(tags::STUDY_INSTANCE_UID, TagAction::Hash),
            rule(tags::SERIES_INSTANCE_UID, TagAction::Hash),
            rule(tags::SOP_INSTANCE_UID, TagAction::Hash),
        ],
        always_preserve: vec![],
        private_tag_default: TagAction::Remove,
        pixel_policy: PixelActionPolicy::NotApplied,
        identifier_policy: IdentifierPolicy::RegenerateDeterministic,
        date_shift_window_days: Some((-365, -30)),
        date_shift_key_source: Some(KeySource::PatientId),
    }
}

/// `strict_oaic`: a tighter research/oversight profile (modelled on
/// Australian OAIC-style guidance): narrower date-shift window, UIDs
/// re-mapped, and institution name replaced with a fixed constant rather
/// than removed (so downstream tooling that expects the field present
/// does not break).
pub fn strict_oaic() -> Profile {
    Profile {
        name: "strict_oaic",
        rules: vec![
            rule(tags::PATIENT_NAME, TagAction::Remove),
            rule(tags::PATIENT_ID, TagAction::Hash),
            rule(tags::PATIENT_BIRTH_DATE, TagAction::Shift { delta_days: 0 }),
            rule(tags::ACCESSION_NUMBER, TagAction::Remove),
            rule(tags::REFERRING_PHYSICIAN_NAME, TagAction::Remove),
            rule(tags::NAME_OF_PHYSICIANS_READING_STUDY, TagAction::Remove),
            rule(
                tags::DEIDENTIFICATION_METHOD,
                TagAction::Replace(ReplaceStrategy::Literal(
                    "HIPAA_SAFE_HARBOR;OAIC_STRICT".to_string(),
                )),
            ),
            rule(tags::STUDY_INSTANCE_UID, TagAction::Hash),
            rule(tags::SERIES_INSTANCE_UID, TagAction::Hash),
            rule(tags::SOP_INSTANCE_UID, TagAction::Hash),
        ],
        always_preserve: vec![],
        private_tag_default: TagAction::Remove,
        pixel_policy: PixelActionPolicy::NotApplied,
        identifier_policy: IdentifierPolicy::RegenerateDeterministic,
        date_shift_window_days: Some((-100, -14)),
        date_shift_key_source: Some(KeySource::PatientId),
    }
}

/// `foi_legal`: freedom-of-information disclosure to a requester with no
/// clinical relationship to the patient. Staff identifiers are redacted,
/// UIDs are preserved for chain-of-custody, and pixel masking is
/// authorised once the Review Session has sealed its region set.
pub fn foi_legal() -> Profile {
    Profile {
        name: "foi_legal",
        rules: vec![
            rule(tags::PATIENT_NAME, TagAction::Retain),
            rule(tags::PATIENT_ID, TagAction::Retain),
            rule(tags::REFERRING_PHYSICIAN_NAME, TagAction::Remove),
            rule(tags::NAME_OF_PHYSICIANS_READING_STUDY, TagAction::Remove),
            rule(tags::STUDY_INSTANCE_UID, TagAction::Retain),
            rule(tags::SERIES_INSTANCE_UID, TagAction::Retain),
            rule(tags::SOP_INSTANCE_UID, TagAction::Retain),
        ],
        always_preserve: vec![
            tags::STUDY_INSTANCE_UID,
            tags::SERIES_INSTANCE_UID,
            tags::SOP_INSTANCE_UID,
        ],
        private_tag_default: TagAction::Remove,
        pixel_policy: PixelActionPolicy::MaskAppliedIfRegions,
        identifier_policy: IdentifierPolicy::Preserve,
        date_shift_window_days: None,
        date_shift_key_source: Some(KeySource::StudyInstanceUid),
    }
}

/// `foi_patient`: freedom-of-information disclosure to the patient
/// themselves (or their authorised representative). Patient identifiers
/// are preserved by definition; staff and third-party identifiers are
/// still redacted.
pub fn foi_patient() -> Profile {
    Profile {
        name: "foi_patient",
        rules: vec![
            rule(tags::PATIENT_NAME, TagAction::Retain),
            rule(tags::PATIENT_ID, TagAction::Retain),
            rule(tags::PATIENT_BIRTH_DATE, TagAction::Retain),
            rule(tags::REFERRING_PHYSICIAN_NAME, TagAction::Remove),
            rule(tags::NAME_OF_PHYSICIANS_READING_STUDY, TagAction::Remove),
            rule(tags::STUDY_INSTANCE_UID, TagAction::Retain),
            rule(tags::SERIES_INSTANCE_UID, TagAction::Retain),
            rule(tags::SOP_INSTANCE_UID, TagAction::Retain),
        ],
        always_preserve: vec![
            tags::PATIENT_NAME,
            tags::PATIENT_ID,
            tags::STUDY_INSTANCE_UID,
            tags::SERIES_INSTANCE_UID,
            tags::SOP_INSTANCE_UID,
        ],
        private_tag_default: TagAction::Remove,
        pixel_policy: PixelActionPolicy::MaskAppliedIfRegions,
        identifier_policy: IdentifierPolicy::Preserve,
        date_shift_window_days: None,
        date_shift_key_source: Some(KeySource::StudyInstanceUid),
    }
}

fn build_registry() -> HashMap<&'static str, Profile> {
    let mut map = HashMap::new();
    map.insert("internal_repair", internal_repair());
    map.insert("research_safe_harbor", research_safe_harbor());
    map.insert("strict_oaic", strict_oaic());
    map.insert("foi_legal", foi_legal());
    map.insert("foi_patient", foi_patient());
    map
}

/// The process-wide, lazily built profile registry.
pub fn registry() -> &'static HashMap<&'static str, Profile> {
    static REGISTRY: OnceLock<HashMap<&'static str, Profile>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Resolve a profile by name, or `ProfileUnknown` if it is outside the
/// closed set.
pub fn resolve(name: &str) -> Result<&'static Profile, AppError> {
    registry()
        .get(name)
        .ok_or_else(|| AppError::ProfileUnknown(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_profile_resolves() {
        for name in PROFILE_NAMES {
            assert!(resolve(name).is_ok(), "profile {name} must resolve");
        }
    }

    #[test]
    fn unknown_profile_is_rejected() {
        assert!(matches!(
            resolve("not_a_real_profile"),
            Err(AppError::ProfileUnknown(_))
        ));
    }

    #[test]
    fn internal_repair_never_touches_pixels_or_uids() {
        let p = internal_repair();
        assert_eq!(p.pixel_policy, PixelActionPolicy::NotApplied);
        assert_eq!(p.identifier_policy, IdentifierPolicy::Preserve);
    }

    #[test]
    fn foi_profiles_key_dates_on_study_not_patient() {
        assert_eq!(
            foi_legal().date_shift_key_source,
            Some(KeySource::StudyInstanceUid)
        );
        assert_eq!(
            foi_patient().date_shift_key_source,
            Some(KeySource::StudyInstanceUid)
        );
    }

    #[test]
    fn research_profiles_key_dates_on_patient() {
        assert_eq!(
            research_safe_harbor().date_shift_key_source,
            Some(KeySource::PatientId)
        );
        assert_eq!(
            strict_oaic().date_shift_key_source,
            Some(KeySource::PatientId)
        );
    }
}
