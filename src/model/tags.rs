//! Tag constants used by the classifier, compliance engine, and bundle
//! writer. Re-exported from `dicom-dictionary-std` under descriptive
//! names so call sites read naturally rather than using the DICOM
//! standard's terse attribute keywords.

pub use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, COLUMNS, DEIDENTIFICATION_METHOD, IMAGE_TYPE, MODALITY,
    NAME_OF_PHYSICIANS_READING_STUDY, NUMBER_OF_FRAMES, PATIENT_BIRTH_DATE, PATIENT_ID,
    PATIENT_IDENTITY_REMOVED, PATIENT_NAME, PATIENT_SEX, PIXEL_DATA, REFERRING_PHYSICIAN_NAME,
    ROWS, SERIES_DATE, SERIES_DESCRIPTION, SERIES_INSTANCE_UID, SERIES_NUMBER, SOP_CLASS_UID,
    SOP_INSTANCE_UID, STUDY_DATE, STUDY_INSTANCE_UID,
};

use dicom_core::Tag;

/// `InstanceNumber` (0020,0013) — primary export-ordering key.
pub const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
/// `AcquisitionTime` (0008,0032) — ordering tie-break.
pub const ACQUISITION_TIME: Tag = Tag(0x0008, 0x0032);
