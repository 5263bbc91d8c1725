//! SOP-class-priority classification into the five category buckets.
//!
//! Rule order is load-bearing: modality alone is never authoritative,
//! which is what makes the "encapsulated PDF declared as modality=US"
//! case classify correctly instead of falling through to DOCUMENT.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Object;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Image,
    Document,
    StructuredReport,
    EncapsulatedPdf,
    Unsupported,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Image => "IMAGE",
            Category::Document => "DOCUMENT",
            Category::StructuredReport => "STRUCTURED_REPORT",
            Category::EncapsulatedPdf => "ENCAPSULATED_PDF",
            Category::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// SOP Class UIDs that are document-like by construction, independent of
/// the declared modality.
const SECONDARY_CAPTURE_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.7", // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.1.7.1",
    "1.2.840.10008.5.1.4.1.1.7.2",
    "1.2.840.10008.5.1.4.1.1.7.3",
    "1.2.840.10008.5.1.4.1.1.7.4",
];
const STRUCTURED_REPORT_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.88.11", // Basic Text SR
    "1.2.840.10008.5.1.4.1.1.88.22", // Enhanced SR
    "1.2.840.10008.5.1.4.1.1.88.33", // Comprehensive SR
    "1.2.840.10008.5.1.4.1.1.88.34", // Comprehensive 3D SR
];
const ENCAPSULATED_PDF_SOP_CLASSES: &[&str] = &["1.2.840.10008.5.1.4.1.1.104.1"];

const DOCUMENT_MODALITIES: &[&str] = &["SC", "OT", "SR", "DOC", "PR"];

fn worksheet_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(WORKSHEET|REPORT)\b").expect("static pattern compiles"))
}

/// Whether a document-classified object is specifically a worksheet /
/// report rather than some other document type, using the same
/// keyword-plus-derived-secondary test `classify` applies internally.
/// Exposed separately so callers that need to tell `WORKSHEET_DETECTED`
/// apart from a generic scope exclusion don't have to re-derive the rule.
pub fn is_worksheet(obj: &Object) -> bool {
    let description = obj.series_description().unwrap_or_default();
    let image_type = obj.image_type();
    let is_derived_secondary = image_type.iter().any(|t| t.eq_ignore_ascii_case("DERIVED"))
        && image_type.iter().any(|t| t.eq_ignore_ascii_case("SECONDARY"));
    worksheet_keyword_re().is_match(&description) && is_derived_secondary
}

/// Classify one object, evaluating rules in a strict, fixed order.
pub fn classify(obj: &Object, parse_succeeded: bool) -> Category {
    if !parse_succeeded {
        return Category::Unsupported;
    }

    classify_fields(
        &obj.sop_class_uid,
        &obj.modality,
        obj.series_description().as_deref().unwrap_or(""),
        &obj.image_type(),
    )
}

/// The pure decision table behind `classify`, factored out so it can be
/// unit-tested directly against field values rather than through a fully
/// parsed dataset.
fn classify_fields(
    sop_class_uid: &str,
    modality: &str,
    series_description: &str,
    image_type: &[String],
) -> Category {
    if ENCAPSULATED_PDF_SOP_CLASSES.contains(&sop_class_uid) {
        return Category::EncapsulatedPdf;
    }
    if STRUCTURED_REPORT_SOP_CLASSES.contains(&sop_class_uid) {
        return Category::StructuredReport;
    }
    if SECONDARY_CAPTURE_SOP_CLASSES.contains(&sop_class_uid) {
        return Category::Document;
    }

    if DOCUMENT_MODALITIES.contains(&modality) {
        return Category::Document;
    }

    let is_derived_secondary = image_type.iter().any(|t| t.eq_ignore_ascii_case("DERIVED"))
        && image_type
            .iter()
            .any(|t| t.eq_ignore_ascii_case("SECONDARY"));
    if worksheet_keyword_re().is_match(series_description) && is_derived_secondary {
        return Category::Document;
    }

    Category::Image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_type_of(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn encapsulated_pdf_with_modality_us_classifies_as_encapsulated_pdf() {
        // Modality is never authoritative over SOP-class-UID: an
        // encapsulated PDF stored under an ultrasound modality must
        // still classify as a document, not an image.
        let category = classify_fields(
            "1.2.840.10008.5.1.4.1.1.104.1",
            "US",
            "",
            &image_type_of(&["ORIGINAL", "PRIMARY"]),
        );
        assert_eq!(category, Category::EncapsulatedPdf);
    }

    #[test]
    fn worksheet_series_description_requires_derived_secondary_image_type() {
        assert_eq!(
            classify_fields(
                "1.2.840.10008.5.1.4.1.1.2",
                "CT",
                "CT WORKSHEET",
                &image_type_of(&["DERIVED", "SECONDARY"])
            ),
            Category::Document
        );
        // Without the DERIVED|SECONDARY image type, the same description
        // must not trip the worksheet rule.
        assert_eq!(
            classify_fields(
                "1.2.840.10008.5.1.4.1.1.2",
                "CT",
                "CT WORKSHEET",
                &image_type_of(&["ORIGINAL", "PRIMARY"])
            ),
            Category::Image
        );
    }

    #[test]
    fn plain_ct_image_classifies_as_image() {
        assert_eq!(
            classify_fields(
                "1.2.840.10008.5.1.4.1.1.2",
                "CT",
                "Chest CT",
                &image_type_of(&["ORIGINAL", "PRIMARY"])
            ),
            Category::Image
        );
    }

    #[test]
    fn document_modality_classifies_as_document_regardless_of_sop_class() {
        assert_eq!(
            classify_fields(
                "1.2.840.10008.5.1.4.1.1.2",
                "SC",
                "",
                &image_type_of(&["DERIVED"])
            ),
            Category::Document
        );
    }
}
