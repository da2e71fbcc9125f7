//! Advice Repository
//!
//! Treatment and prevention guidance keyed by disease label, with Amharic
//! text for farmers. Lookups never fail: labels without a curated entry get
//! the "consult a local agricultural expert" default.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{PlantDoctorError, Result};

/// Structured treatment advice for one disease label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceEntry {
    /// Treatment instructions
    pub treatment: String,
    /// Treatment instructions in Amharic
    #[serde(alias = "amharic")]
    pub localized_treatment: String,
    /// Prevention tips, most important first
    #[serde(alias = "prevention")]
    pub prevention_tips: Vec<String>,
    /// Organic treatment options
    #[serde(alias = "organic")]
    pub organic_options: String,
}

impl AdviceEntry {
    fn new(treatment: &str, localized: &str, prevention: &[&str], organic: &str) -> Self {
        Self {
            treatment: treatment.to_string(),
            localized_treatment: localized.to_string(),
            prevention_tips: prevention.iter().map(|s| s.to_string()).collect(),
            organic_options: organic.to_string(),
        }
    }

    /// The entry returned for labels without curated advice
    pub fn default_entry() -> Self {
        Self::new(
            "Consult local agricultural expert for specific treatment recommendations. Remove infected plant parts and improve growing conditions.",
            "ለተወሰኑ የሕክምና ምክሮች ከአካባቢዎ የሰብል ምሁር ይጠይቁ። የተበሳጩ የተክል ክፍሎችን ያስወግዱ እና የእድገት ሁኔታዎችን ያሻሽሉ።",
            &[
                "Practice crop rotation regularly",
                "Maintain soil health with organic matter",
                "Monitor plants regularly for early detection",
                "Use resistant varieties when available",
            ],
            "Consult organic farming experts in your area for specific recommendations",
        )
    }

    fn check(&self, label: &str) -> std::result::Result<(), String> {
        if self.treatment.trim().is_empty() {
            return Err(format!("entry '{}' has an empty treatment", label));
        }
        if self.prevention_tips.is_empty() {
            return Err(format!("entry '{}' has no prevention tips", label));
        }
        Ok(())
    }
}

fn builtin_entries() -> Vec<(&'static str, AdviceEntry)> {
    vec![
        (
            "Tomato_Early_blight",
            AdviceEntry::new(
                "Apply copper-based fungicide every 7-10 days. Remove and destroy infected leaves. Improve air circulation.",
                "ከሚያስከትሉ ንጥረ ነገሮች ጋር የተለቀ ማር በየ 7-10 ቀናት ይበጁ። የተበሳጩ ቅጠሎችን ያስወግዱ። የአየር ማስተላለፍን ያሻሽሉ።",
                &[
                    "Rotate crops yearly with non-solanaceous plants",
                    "Ensure good air circulation between plants",
                    "Water at base of plant, avoid wetting leaves",
                    "Remove plant debris at end of season",
                ],
                "Use neem oil spray or baking soda solution (1 tbsp baking soda + 1 tsp horticultural oil + 1 gallon water)",
            ),
        ),
        (
            "Tomato_Late_blight",
            AdviceEntry::new(
                "Apply fungicides containing chlorothalonil or mancozeb immediately. Remove severely infected plants.",
                "ወዲያውኑ ክሎሮታሎኒል ወይም ማንኮዜብ የያዙ ንጥረ ነገሮችን ይበጁ። ከፍተኛ የተበሳጩ ተክሎችን ያስወግዱ።",
                &[
                    "Use resistant tomato varieties",
                    "Avoid overhead watering",
                    "Space plants properly for air circulation",
                    "Apply preventative fungicides in humid weather",
                ],
                "Copper-based fungicides applied every 7-10 days during favorable disease conditions",
            ),
        ),
        (
            "Tomato_Bacterial_spot",
            AdviceEntry::new(
                "Apply copper-based bactericide. Remove severely infected plants to prevent spread.",
                "ከሚያስከትሉ ንጥረ ነገሮች ጋር የተለቀ ባክተሪያ ይበጁ። ለማራገፍ ከፍተኛ የተበሳጩ ተክሎችን ያስወግዱ።",
                &[
                    "Use disease-free seeds and transplants",
                    "Avoid working with plants when wet",
                    "Sterilize gardening tools regularly",
                    "Practice crop rotation",
                ],
                "Copper fungicide sprays and plant-based bactericides",
            ),
        ),
        (
            "Tomato_healthy",
            AdviceEntry::new(
                "Your plant is healthy! Continue good farming practices like proper watering and fertilization.",
                "የእርስዎ ተክል ጤናማ ነው! ትክክለኛ መጠጣት እና ማዳበሪያ አዝራሮችን ይቀጥሉ።",
                &[
                    "Continue regular monitoring",
                    "Maintain soil health with organic matter",
                    "Practice crop rotation",
                    "Watch for early signs of pests or diseases",
                ],
                "Continue organic practices like composting and natural pest control",
            ),
        ),
        (
            "Potato___Early_blight",
            AdviceEntry::new(
                "Apply fungicides containing chlorothalonil or azoxystrobin. Remove infected leaves.",
                "ክሎሮታሎኒል ወይም አዞክሲስትሮቢን የያዙ ንጥረ ነገሮችን ይበጁ። የተበሳጩ ቅጠሎችን ያስወግዱ።",
                &[
                    "Practice 3-year crop rotation",
                    "Ensure proper plant spacing",
                    "Water in morning to allow leaves to dry",
                    "Use certified disease-free seed potatoes",
                ],
                "Bacillus subtilis or copper-based fungicides applied preventatively",
            ),
        ),
        (
            "Potato___Late_blight",
            AdviceEntry::new(
                "Apply fungicides containing metalaxyl or mancozeb. Destroy infected plants immediately.",
                "ሜታላክሲል ወይም ማንኮዜብ የያዙ ንጥረ ነገሮችን ይበጁ። የተበሳጩ ተክሎችን ወዲያውኑ ያጥፉ።",
                &[
                    "Use certified disease-free seed potatoes",
                    "Destroy volunteer potato plants",
                    "Avoid overhead irrigation",
                    "Harvest in dry weather",
                ],
                "Copper-based fungicides and resistant varieties",
            ),
        ),
        (
            "Maize_Rust",
            AdviceEntry::new(
                "Apply fungicide at first sign of disease. Use resistant varieties.",
                "የበሽታ ምልክት ሲታይ ንጥረ ነገር ይበጁ። የተቋቋሙ ዝርያዎችን ይጠቀሙ።",
                &["Plant early", "Ensure proper spacing", "Remove crop debris"],
                "Sulfur-based fungicides",
            ),
        ),
    ]
}

/// Lowercase alphanumeric form used to match label spelling variants,
/// e.g. `Tomato___Early_blight` and `Tomato_Early_blight`
fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// On-disk form of an externalized advice table
#[derive(Debug, Deserialize)]
struct AdviceFile {
    #[serde(default)]
    default: Option<AdviceEntry>,
    entries: BTreeMap<String, AdviceEntry>,
}

/// Total lookup from disease label to advice
#[derive(Debug, Clone)]
pub struct AdviceRepository {
    entries: HashMap<String, AdviceEntry>,
    /// Normalized label -> key in `entries`
    aliases: HashMap<String, String>,
    default: AdviceEntry,
}

impl Default for AdviceRepository {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AdviceRepository {
    /// The curated table shipped with the crate
    pub fn builtin() -> Self {
        Self::from_entries(
            builtin_entries()
                .into_iter()
                .map(|(label, entry)| (label.to_string(), entry)),
            AdviceEntry::default_entry(),
        )
    }

    /// Load an advice table from JSON, replacing the built-in entries
    ///
    /// A file without a `default` keeps the built-in default entry.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlantDoctorError::CatalogLoad(path.to_path_buf(), e.to_string()))?;

        let file: AdviceFile = serde_json::from_str(&content)
            .map_err(|e| PlantDoctorError::CatalogLoad(path.to_path_buf(), e.to_string()))?;

        let default = file.default.unwrap_or_else(AdviceEntry::default_entry);
        default
            .check("default")
            .map_err(|msg| PlantDoctorError::CatalogLoad(path.to_path_buf(), msg))?;
        let mut normalized: HashMap<String, &str> = HashMap::new();
        for (label, entry) in &file.entries {
            entry
                .check(label)
                .map_err(|msg| PlantDoctorError::CatalogLoad(path.to_path_buf(), msg))?;

            if let Some(other) = normalized.insert(normalize_label(label), label) {
                return Err(PlantDoctorError::CatalogLoad(
                    path.to_path_buf(),
                    format!("labels '{}' and '{}' are spelling variants of each other", other, label),
                ));
            }
        }

        let repo = Self::from_entries(file.entries, default);
        debug!("Loaded {} advice entries from {:?}", repo.len(), path);
        Ok(repo)
    }

    fn from_entries<I>(entries: I, default: AdviceEntry) -> Self
    where
        I: IntoIterator<Item = (String, AdviceEntry)>,
    {
        let entries: HashMap<String, AdviceEntry> = entries.into_iter().collect();
        let aliases = entries
            .keys()
            .map(|key| (normalize_label(key), key.clone()))
            .collect();

        Self {
            entries,
            aliases,
            default,
        }
    }

    /// Advice for a label; falls back to the default entry, never fails
    pub fn advice_for(&self, label: &str) -> &AdviceEntry {
        self.lookup(label).unwrap_or(&self.default)
    }

    /// Whether a label has curated (non-default) advice
    pub fn has_specific_advice(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    fn lookup(&self, label: &str) -> Option<&AdviceEntry> {
        self.entries.get(label).or_else(|| {
            self.aliases
                .get(&normalize_label(label))
                .and_then(|key| self.entries.get(key))
        })
    }

    /// The entry returned for unknown labels
    pub fn default_entry(&self) -> &AdviceEntry {
        &self.default
    }

    /// Number of curated entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Curated labels, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}
