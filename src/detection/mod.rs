//! The detection adapter boundary. The core never embeds an OCR or
//! burned-in-text detector; it only defines the contract one must satisfy
//! and the bounded-confidence shape its output must take. Region geometry
//! and a confidence bucket cross this boundary — recovered text never
//! does, by construction (`Region` has no text-value field).

use crate::error::AppError;
use crate::review::Region;

/// Which parts of the frame a detector is being asked to scan. Detectors
/// commonly tune sensitivity differently for header/footer burn-in bands
/// versus the body of the image.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ZonePolicy {
    HeaderFooterOnly,
    FullFrame,
}

/// One decoded pixel frame, addressed independent of codec, handed to a
/// detector for scanning.
pub struct PixelFrame<'a> {
    pub bytes: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub frame_index: i32,
}

/// The detector contract. Implementations are injected by the caller;
/// the core only depends on this trait, never on a concrete OCR engine.
pub trait Adapter {
    /// Detect candidate burned-in-text regions in one frame. Must return
    /// `Err(AppError::DetectionUnavailable(..))` rather than panicking
    /// when the underlying engine cannot run (missing model weights,
    /// timeout, crash) — the Review Session treats that as a logged
    /// warning, not a fatal error, and falls back to operator-only
    /// regions for that frame.
    fn detect(
        &self,
        frame: &PixelFrame<'_>,
        modality_hint: &str,
        zone_policy: ZonePolicy,
    ) -> Result<Vec<Region>, AppError>;
}

/// The default adapter when no detector is configured: every call fails
/// with `DetectionUnavailable`, exercising the Review Session's
/// operator-only fallback path without depending on a real detector.
pub struct NullAdapter;

impl Adapter for NullAdapter {
    fn detect(
        &self,
        _frame: &PixelFrame<'_>,
        _modality_hint: &str,
        _zone_policy: ZonePolicy,
    ) -> Result<Vec<Region>, AppError> {
        Err(AppError::DetectionUnavailable(
            "no detection adapter configured for this run".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_adapter_always_reports_unavailable() {
        let adapter = NullAdapter;
        let frame = PixelFrame {
            bytes: &[],
            width: 0,
            height: 0,
            frame_index: 0,
        };
        let err = adapter
            .detect(&frame, "US", ZonePolicy::HeaderFooterOnly)
            .unwrap_err();
        assert!(matches!(err, AppError::DetectionUnavailable(_)));
    }
}
