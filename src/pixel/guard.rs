//! The pixel invariant guard: fatal, run-aborting enforcement of the
//! passthrough contract.

use crate::compliance::PixelAction;
use crate::error::AppError;
use crate::identity::hash_bytes;
use crate::model::Object;

/// Verify the pixel contract between `input` and `output` for the given
/// `pixel_action`. On a passthrough violation this returns a fatal
/// `PixelInvariantViolated` error; callers must treat this as run-fatal,
/// never as a per-object skip.
pub fn enforce_passthrough(
    input: &Object,
    output: &Object,
    pixel_action: PixelAction,
) -> Result<(), AppError> {
    enforce_passthrough_hashes(
        &input.triad.sop_instance_uid,
        hash_bytes(input.pixel_bytes()),
        &input.transfer_syntax_uid,
        hash_bytes(output.pixel_bytes()),
        &output.transfer_syntax_uid,
        pixel_action,
    )
}

/// The same contract as [`enforce_passthrough`], operating on already
/// computed digests and transfer-syntax strings. This is what the run
/// pipeline actually calls: by the time hash-verify runs, the "before"
/// object has already been consumed by the mutation phase (the pipeline
/// threads an `Object` through parse < classify < plan < mutate by
/// value), so only its captured digest and transfer-syntax survive to
/// this point, not the object itself.
pub fn enforce_passthrough_hashes(
    sop_instance_uid: &str,
    hash_before: String,
    transfer_syntax_before: &str,
    hash_after: String,
    transfer_syntax_after: &str,
    pixel_action: PixelAction,
) -> Result<(), AppError> {
    match pixel_action {
        PixelAction::NotApplied => {
            if hash_before != hash_after {
                return Err(AppError::PixelInvariantViolated {
                    sop_instance_uid: sop_instance_uid.to_string(),
                    hash_before,
                    hash_after,
                    tag_path: "PixelData".to_string(),
                });
            }
            if transfer_syntax_before != transfer_syntax_after {
                return Err(AppError::PixelInvariantViolated {
                    sop_instance_uid: sop_instance_uid.to_string(),
                    hash_before,
                    hash_after,
                    tag_path: "TransferSyntaxUID".to_string(),
                });
            }
            Ok(())
        }
        PixelAction::MaskApplied => {
            if hash_before == hash_after {
                return Err(AppError::PixelInvariantViolated {
                    sop_instance_uid: sop_instance_uid.to_string(),
                    hash_before,
                    hash_after,
                    tag_path: "PixelData (expected mask to change pixel bytes)".to_string(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Object, Triad};
    use std::path::PathBuf;

    fn stub_object(sop_instance_uid: &str, transfer_syntax: &str, pixels: &[u8]) -> Object {
        Object::test_only_stub(
            Triad {
                study_instance_uid: "1.2.3".into(),
                series_instance_uid: "1.2.3.4".into(),
                sop_instance_uid: sop_instance_uid.into(),
            },
            transfer_syntax.into(),
            pixels.to_vec(),
        )
    }

    #[test]
    fn passthrough_with_identical_pixels_and_syntax_is_ok() {
        let a = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        let b = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        assert!(enforce_passthrough(&a, &b, PixelAction::NotApplied).is_ok());
    }

    #[test]
    fn passthrough_with_changed_pixels_is_rejected() {
        let a = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        let b = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[9, 9, 9]);
        let err = enforce_passthrough(&a, &b, PixelAction::NotApplied).unwrap_err();
        assert!(matches!(err, AppError::PixelInvariantViolated { .. }));
    }

    #[test]
    fn passthrough_with_changed_transfer_syntax_is_rejected() {
        let a = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        let b = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.4.50", &[1, 2, 3]);
        let err = enforce_passthrough(&a, &b, PixelAction::NotApplied).unwrap_err();
        assert!(matches!(err, AppError::PixelInvariantViolated { .. }));
    }

    #[test]
    fn mask_applied_requires_pixels_to_differ() {
        let a = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        let unchanged = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[1, 2, 3]);
        let changed = stub_object("1.2.3.4.5", "1.2.840.10008.1.2.1", &[0, 2, 3]);

        assert!(enforce_passthrough(&a, &unchanged, PixelAction::MaskApplied).is_err());
        assert!(enforce_passthrough(&a, &changed, PixelAction::MaskApplied).is_ok());
    }
}
