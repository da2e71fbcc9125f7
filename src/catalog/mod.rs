//! Catalogs consulted after inference
//!
//! - `labels`: class index ↔ disease label, loaded from `class_names.json`
//! - `advice`: disease label → treatment advice, total with a default entry

pub mod advice;
pub mod labels;

pub use advice::{AdviceEntry, AdviceRepository};
pub use labels::LabelMap;
