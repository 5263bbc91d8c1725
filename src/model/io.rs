//! Thin helpers over `dicom-object` so the rest of the crate reads in
//! terms of `Option<String>`/`Vec<String>`/raw bytes instead of the
//! element/VR plumbing. Grounded on the same `to_string`/`to_string_opt`
//! wrapper shape used throughout the DICOM-tooling lineage in the
//! retrieval pack (`dcm_data::io`).

use dicom_core::header::HasLength;
use dicom_core::{Tag, VR};
use dicom_object::{FileDicomObject, InMemDicomObject};

use crate::error::ParseErrorKind;

pub fn get_string(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
}

pub fn get_u32(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<u32> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u32>().ok())
}

pub fn get_multi_string(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Vec<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_str().ok())
        .map(|v| v.into_iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

pub fn set_string(obj: &mut InMemDicomObject, tag: Tag, value: &str) {
    set_string_vr(obj, tag, VR::LO, value);
}

/// Like [`set_string`] but with an explicit VR, for call sites that
/// replace a tag whose value representation is not the generic `LO`
/// (UID remapping uses `UI`, date shifting uses `DA`).
pub fn set_string_vr(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    use dicom_core::value::PrimitiveValue;
    obj.put_element(dicom_core::DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

pub fn remove(obj: &mut InMemDicomObject, tag: Tag) {
    obj.remove_element(tag);
}

pub fn private_tags(obj: &FileDicomObject<InMemDicomObject>) -> Vec<Tag> {
    obj.iter()
        .map(|e| e.header().tag)
        .filter(|tag| tag.group() % 2 == 1)
        .collect()
}

pub fn all_tags(obj: &FileDicomObject<InMemDicomObject>) -> Vec<Tag> {
    obj.iter().map(|e| e.header().tag).collect()
}

pub fn pixel_bytes(obj: &FileDicomObject<InMemDicomObject>) -> Vec<u8> {
    obj.element(super::tags::PIXEL_DATA)
        .ok()
        .and_then(|e| e.to_bytes().ok())
        .map(|cow| cow.into_owned())
        .unwrap_or_default()
}

pub fn set_pixel_bytes(obj: &mut InMemDicomObject, bytes: Vec<u8>) {
    use dicom_core::value::PrimitiveValue;
    obj.put_element(dicom_core::DataElement::new(
        super::tags::PIXEL_DATA,
        VR::OB,
        PrimitiveValue::from(bytes),
    ));
}

pub fn write(obj: &FileDicomObject<InMemDicomObject>) -> Result<Vec<u8>, crate::error::AppError> {
    let capacity = obj.length().get().map(|l| l as usize).unwrap_or(4096);
    let mut out = Vec::with_capacity(capacity);
    obj.write_all(&mut out).map_err(|e| crate::error::AppError::Io(
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    ))?;
    Ok(out)
}

pub fn classify_read_error(err: &dicom_object::ReadError) -> ParseErrorKind {
    let msg = err.to_string().to_ascii_lowercase();
    if msg.contains("transfer syntax") {
        ParseErrorKind::UnsupportedTransferSyntax
    } else if msg.contains("eof") || msg.contains("unexpected end") || msg.contains("truncat") {
        ParseErrorKind::Truncated
    } else if msg.contains("vr") || msg.contains("value representation") {
        ParseErrorKind::UnknownTagVr
    } else {
        ParseErrorKind::NotAnImageObject
    }
}
