//! Dataset and tag representation: the object model core types.
//!
//! `Object` wraps a parsed DICOM dataset (`dicom-object`'s in-memory
//! representation) together with the triad identity and classification
//! the rest of the pipeline needs. Everything that touches tag values goes
//! through `get`/`set`/`remove` so that mutation is always visible at one
//! seam, which is what lets `run::Pipeline` move an `Object` through
//! parse < classify < plan < mutate < hash-verify < record without ever
//! mutating it out of turn.

pub mod classify;
pub mod io;
pub mod tags;

use std::path::{Path, PathBuf};

use dicom_core::Tag;
use dicom_object::{FileDicomObject, InMemDicomObject};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ParseErrorKind};

pub use classify::{classify, Category};

/// The globally unique study/series/instance triad carried by every object.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Triad {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

/// `{include_images, include_documents}`; defaults to admitting images
/// but not documents.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SelectionScope {
    pub include_images: bool,
    pub include_documents: bool,
}

impl Default for SelectionScope {
    fn default() -> Self {
        SelectionScope {
            include_images: true,
            include_documents: false,
        }
    }
}

impl SelectionScope {
    /// Whether this scope admits an object of the given classification.
    pub fn admits(&self, category: Category) -> bool {
        match category {
            Category::Image => self.include_images,
            Category::Document | Category::StructuredReport | Category::EncapsulatedPdf => {
                self.include_documents
            }
            Category::Unsupported => false,
        }
    }
}

/// A parsed medical-image object: metadata tags, transfer syntax, and an
/// optional pixel payload, addressable independent of codec.
pub struct Object {
    dataset: FileDicomObject<InMemDicomObject>,
    pub source_path: PathBuf,
    pub triad: Triad,
    pub transfer_syntax_uid: String,
    pub modality: String,
    pub sop_class_uid: String,
    category: Option<Category>,
    /// Cached copy of the `PixelData` bytes, independent of codec.
    /// Caching avoids re-walking the dataset on every `pixel_bytes()`
    /// call from the (potentially hot) hash-verify phase.
    pixel: Vec<u8>,
}

impl Object {
    /// Parse `bytes` (one DICOM file's contents) read from `source_path`.
    pub fn load(bytes: &[u8], source_path: &Path) -> Result<Object, AppError> {
        if bytes.len() < 132 || &bytes[128..132] != b"DICM" {
            return Err(AppError::Parse {
                path: source_path.to_path_buf(),
                kind: ParseErrorKind::NotAnImageObject,
            });
        }

        let dataset = dicom_object::from_reader(std::io::Cursor::new(bytes)).map_err(|e| {
            let kind = io::classify_read_error(&e);
            AppError::Parse {
                path: source_path.to_path_buf(),
                kind,
            }
        })?;

        let transfer_syntax_uid = dataset.meta().transfer_syntax().trim_end_matches('\0').to_string();
        if dicom_transfer_syntax_registry::entry_for_uid(&transfer_syntax_uid).is_none() {
            return Err(AppError::Parse {
                path: source_path.to_path_buf(),
                kind: ParseErrorKind::UnsupportedTransferSyntax,
            });
        }

        let triad = Triad {
            study_instance_uid: io::get_string(&dataset, tags::STUDY_INSTANCE_UID)
                .unwrap_or_default(),
            series_instance_uid: io::get_string(&dataset, tags::SERIES_INSTANCE_UID)
                .unwrap_or_default(),
            sop_instance_uid: io::get_string(&dataset, tags::SOP_INSTANCE_UID)
                .unwrap_or_default(),
        };
        let modality = io::get_string(&dataset, tags::MODALITY).unwrap_or_default();
        let sop_class_uid = io::get_string(&dataset, tags::SOP_CLASS_UID).unwrap_or_default();
        let pixel = io::pixel_bytes(&dataset);

        Ok(Object {
            dataset,
            source_path: source_path.to_path_buf(),
            triad,
            transfer_syntax_uid,
            modality,
            sop_class_uid,
            category: None,
            pixel,
        })
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    pub fn set_category(&mut self, category: Category) {
        self.category = Some(category);
    }

    pub fn series_description(&self) -> Option<String> {
        io::get_string(&self.dataset, tags::SERIES_DESCRIPTION)
    }

    pub fn image_type(&self) -> Vec<String> {
        io::get_multi_string(&self.dataset, tags::IMAGE_TYPE)
    }

    pub fn get_string(&self, tag: Tag) -> Option<String> {
        io::get_string(&self.dataset, tag)
    }

    pub fn set_string(&mut self, tag: Tag, value: &str) {
        io::set_string(&mut self.dataset, tag, value);
    }

    /// Set a UID-valued tag (`UI` VR), used for identifier remapping.
    pub fn set_uid(&mut self, tag: Tag, value: &str) {
        io::set_string_vr(&mut self.dataset, tag, dicom_core::VR::UI, value);
    }

    /// Set a date-valued tag (`DA` VR), used for date shifting.
    pub fn set_date(&mut self, tag: Tag, value: &str) {
        io::set_string_vr(&mut self.dataset, tag, dicom_core::VR::DA, value);
    }

    pub fn remove(&mut self, tag: Tag) {
        io::remove(&mut self.dataset, tag);
    }

    pub fn has(&self, tag: Tag) -> bool {
        self.dataset.element(tag).is_ok()
    }

    /// All private (odd group number) tags present in the dataset.
    pub fn private_tags(&self) -> Vec<Tag> {
        io::private_tags(&self.dataset)
    }

    /// All tags present in the dataset, for the compliance engine to plan over.
    pub fn tags(&self) -> Vec<Tag> {
        io::all_tags(&self.dataset)
    }

    /// Raw pixel bytes, independent of codec, or `&[]` if this object
    /// carries no `PixelData` element.
    pub fn pixel_bytes(&self) -> &[u8] {
        &self.pixel
    }

    pub fn set_pixel_bytes(&mut self, bytes: Vec<u8>) {
        io::set_pixel_bytes(&mut self.dataset, bytes.clone());
        self.pixel = bytes;
    }

    pub fn number_of_frames(&self) -> u32 {
        io::get_string(&self.dataset, tags::NUMBER_OF_FRAMES)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1)
    }

    pub fn rows(&self) -> u32 {
        io::get_u32(&self.dataset, tags::ROWS).unwrap_or(0)
    }

    pub fn columns(&self) -> u32 {
        io::get_u32(&self.dataset, tags::COLUMNS).unwrap_or(0)
    }

    /// `InstanceNumber` (0020,0013), the export orderer's primary key.
    pub fn instance_number(&self) -> Option<i32> {
        io::get_string(&self.dataset, tags::INSTANCE_NUMBER)
            .and_then(|s| s.trim().parse().ok())
    }

    /// `AcquisitionTime` (0008,0032), the export orderer's second tie-break.
    pub fn acquisition_time(&self) -> Option<String> {
        io::get_string(&self.dataset, tags::ACQUISITION_TIME)
    }

    /// Serialize the dataset back to bytes, preserving transfer syntax
    /// unless it was explicitly recoded.
    pub fn write(&self) -> Result<Vec<u8>, AppError> {
        io::write(&self.dataset)
    }

    /// Build a bare-minimum `Object` for unit tests that only care about
    /// triad identity, transfer syntax, and pixel bytes (the pixel guard,
    /// the orderer, and the bundle writer's hashing all fall in this
    /// category). Never used outside `#[cfg(test)]` call sites: real
    /// objects always come from `Object::load`.
    #[cfg(test)]
    pub(crate) fn test_only_stub(triad: Triad, transfer_syntax_uid: String, pixel: Vec<u8>) -> Object {
        Object {
            dataset: FileDicomObject::new_empty_with_meta(
                InMemDicomObject::new_empty(),
                dicom_object::meta::FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                    .media_storage_sop_instance_uid(triad.sop_instance_uid.clone())
                    .transfer_syntax(transfer_syntax_uid.clone())
                    .build()
                    .expect("test fixture meta table is well-formed"),
            ),
            source_path: PathBuf::from("test-fixture.dcm"),
            triad,
            transfer_syntax_uid,
            modality: "OT".to_string(),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
            category: Some(Category::Image),
            pixel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_scope_default_is_images_only() {
        let scope = SelectionScope::default();
        assert!(scope.admits(Category::Image));
        assert!(!scope.admits(Category::Document));
        assert!(!scope.admits(Category::EncapsulatedPdf));
        assert!(!scope.admits(Category::Unsupported));
    }
}
