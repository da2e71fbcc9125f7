//! Model module for the CNN architecture using the Burn framework
//!
//! The architecture here is what the full-network engine restores from a
//! `CompactRecorder` record. Training lives outside this crate.

pub mod cnn;

pub use cnn::{PlantClassifier, PlantClassifierConfig, MIN_INPUT_SIZE};
