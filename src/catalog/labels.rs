//! Label Catalog
//!
//! Maps the dense class indices produced by a classifier onto disease labels.
//! The persisted form is the `class_names.json` written next to a trained
//! model: an object from label to index, e.g. `{"Tomato_Early_blight": 0}`.
//! A plain ordered list of labels is accepted as well.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::utils::error::{PlantDoctorError, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelMapFile {
    ByLabel(BTreeMap<String, usize>),
    Ordered(Vec<String>),
}

/// Ordered bijection between class indices `[0, N)` and label strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    /// Labels in index order
    labels: Vec<String>,
    /// Reverse lookup from label to index
    index: HashMap<String, usize>,
}

impl LabelMap {
    /// Load a label map from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlantDoctorError::CatalogLoad(path.to_path_buf(), e.to_string()))?;

        let map = Self::parse_at(&content, path)?;
        debug!("Loaded {} labels from {:?}", map.len(), path);
        Ok(map)
    }

    /// Parse a label map from JSON text
    pub fn parse(json: &str) -> Result<Self> {
        Self::parse_at(json, Path::new("<memory>"))
    }

    /// Build a label map from labels given in index order
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = labels.into_iter().map(Into::into).collect();
        Self::from_ordered(labels)
            .map_err(|msg| PlantDoctorError::CatalogLoad(PathBuf::from("<memory>"), msg))
    }

    fn parse_at(json: &str, origin: &Path) -> Result<Self> {
        let file: LabelMapFile = serde_json::from_str(json).map_err(|e| {
            PlantDoctorError::CatalogLoad(
                origin.to_path_buf(),
                format!("expected a label->index object or a label list: {}", e),
            )
        })?;

        let built = match file {
            LabelMapFile::ByLabel(pairs) => Self::from_pairs(pairs),
            LabelMapFile::Ordered(labels) => Self::from_ordered(labels),
        };

        built.map_err(|msg| PlantDoctorError::CatalogLoad(origin.to_path_buf(), msg))
    }

    /// Invert a label->index table, checking the indices cover `[0, N)` exactly once
    fn from_pairs(pairs: BTreeMap<String, usize>) -> std::result::Result<Self, String> {
        let n = pairs.len();
        let mut slots: Vec<Option<String>> = vec![None; n];

        for (label, idx) in pairs {
            if idx >= n {
                return Err(format!(
                    "index {} for '{}' is outside the dense range [0, {})",
                    idx, label, n
                ));
            }
            if let Some(existing) = &slots[idx] {
                return Err(format!(
                    "index {} is assigned to both '{}' and '{}'",
                    idx, existing, label
                ));
            }
            slots[idx] = Some(label);
        }

        // With n labels, n slots and no duplicates every slot is filled
        let labels = slots.into_iter().flatten().collect();
        Self::from_ordered(labels)
    }

    fn from_ordered(labels: Vec<String>) -> std::result::Result<Self, String> {
        if labels.is_empty() {
            return Err("label map is empty".to_string());
        }

        let mut index = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(format!("label at index {} is blank", idx));
            }
            if index.insert(label.clone(), idx).is_some() {
                return Err(format!("label '{}' appears more than once", label));
            }
        }

        Ok(Self { labels, index })
    }

    /// Get the label for a class index
    pub fn label_for(&self, index: usize) -> Result<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or(PlantDoctorError::UnknownIndex {
                index,
                len: self.labels.len(),
            })
    }

    /// Get the class index for a label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Whether the catalog contains a label
    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in index order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Iterate `(index, label)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().enumerate().map(|(i, l)| (i, l.as_str()))
    }
}
