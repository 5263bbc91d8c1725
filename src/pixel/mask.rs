//! Region-based pixel masking: the only place in the core that is
//! permitted to mutate pixel bytes, and only ever reachable once a
//! Review Session has sealed its region set (`run::Pipeline` is the sole
//! caller, and only on the `MaskApplied` branch of a resolved `Plan`).

use crate::model::Object;
use crate::review::Region;

/// Bytes-per-pixel assumption used for the simple raster mask below. Real
/// deployments vary by `BitsAllocated`/`SamplesPerPixel`; this crate
/// treats the pixel buffer as an opaque single-channel 8-bit raster for
/// masking purposes, which is sufficient to guarantee the masked region's
/// bytes differ from source without re-implementing a pixel codec —
/// decoding compressed pixel data is `dicom-pixeldata`'s job, out of
/// scope for this crate to duplicate.
const BYTES_PER_PIXEL: usize = 1;

/// Zero out every region accepted for `obj`, across every frame the
/// region's `frame_index` selects (`-1` means all frames).
///
/// `width`/`height` describe the raster the pixel buffer is addressed
/// against (`Columns`/`Rows` in DICOM terms) and `frame_count` is the
/// number of frames in the multi-frame payload.
pub fn apply_regions(
    obj: &mut Object,
    regions: &[Region],
    width: usize,
    height: usize,
    frame_count: usize,
) {
    if regions.is_empty() {
        return;
    }

    let frame_len = width * height * BYTES_PER_PIXEL;
    let mut pixels = obj.pixel_bytes().to_vec();
    if pixels.len() < frame_len * frame_count {
        pixels.resize(frame_len * frame_count, 0);
    }

    for region in regions {
        let frames: Vec<usize> = if region.frame_index < 0 {
            (0..frame_count).collect()
        } else {
            vec![region.frame_index as usize]
        };

        for frame in frames {
            if frame >= frame_count {
                continue;
            }
            mask_rectangle(&mut pixels, frame * frame_len, width, height, region);
        }
    }

    obj.set_pixel_bytes(pixels);
}

fn mask_rectangle(buf: &mut [u8], frame_offset: usize, width: usize, height: usize, region: &Region) {
    let x0 = region.x.min(width as i32).max(0) as usize;
    let y0 = region.y.min(height as i32).max(0) as usize;
    let x1 = (region.x + region.w).clamp(0, width as i32) as usize;
    let y1 = (region.y + region.h).clamp(0, height as i32) as usize;

    for y in y0..y1 {
        let row_start = frame_offset + y * width;
        if row_start >= buf.len() {
            break;
        }
        let row_end = (row_start + x1).min(buf.len());
        let row_mask_start = (row_start + x0).min(row_end);
        for b in &mut buf[row_mask_start..row_end] {
            *b = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Object, Triad};
    use crate::review::{RegionAction, RegionSource, RegionStrength, Zone};
    use uuid::Uuid;

    fn object_with_pixels(width: usize, height: usize) -> Object {
        Object::test_only_stub(
            Triad {
                study_instance_uid: "1".into(),
                series_instance_uid: "1.1".into(),
                sop_instance_uid: "1.1.1".into(),
            },
            "1.2.840.10008.1.2.1".into(),
            vec![0xFF; width * height],
        )
    }

    fn region(x: i32, y: i32, w: i32, h: i32) -> Region {
        Region {
            region_id: Uuid::nil(),
            x,
            y,
            w,
            h,
            source: RegionSource::Operator,
            detection_strength: RegionStrength::None,
            zone: Zone::Body,
            default_action: RegionAction::Mask,
            reviewer_action: RegionAction::Mask,
            frame_index: -1,
            bulk_provenance: None,
        }
    }

    #[test]
    fn masking_zeroes_only_the_region_rectangle() {
        let mut obj = object_with_pixels(4, 4);
        apply_regions(&mut obj, &[region(1, 1, 2, 2)], 4, 4, 1);

        let pixels = obj.pixel_bytes();
        // Row 0 and row 3 untouched.
        assert_eq!(&pixels[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&pixels[12..16], &[0xFF, 0xFF, 0xFF, 0xFF]);
        // Row 1, columns 1-2 masked, columns 0 and 3 untouched.
        assert_eq!(&pixels[4..8], &[0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn empty_region_list_leaves_pixels_untouched() {
        let mut obj = object_with_pixels(2, 2);
        let before = obj.pixel_bytes().to_vec();
        apply_regions(&mut obj, &[], 2, 2, 1);
        assert_eq!(obj.pixel_bytes(), before.as_slice());
    }

    #[test]
    fn frame_index_minus_one_applies_to_every_frame() {
        let mut obj = object_with_pixels(2, 2);
        // Two frames of 2x2.
        obj.set_pixel_bytes(vec![0xFF; 8]);
        apply_regions(&mut obj, &[region(0, 0, 1, 1)], 2, 2, 2);
        let pixels = obj.pixel_bytes();
        assert_eq!(pixels[0], 0x00); // frame 0, (0,0)
        assert_eq!(pixels[4], 0x00); // frame 1, (0,0)
    }
}
