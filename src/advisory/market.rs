//! Market price board
//!
//! Per-crop price lists across Ethiopian markets, quoted in ETB per quintal.
//! Lookups match crop names case-insensitively by substring and return the
//! best price first.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDoctorError, Result};

/// Unit every price on the board is quoted in
pub const PRICE_UNIT: &str = "Quintal (100KG)";

/// Currency of every price on the board
pub const CURRENCY: &str = "ETB";

/// Markets covered by the built-in board
pub const ETHIOPIAN_MARKETS: [&str; 7] = [
    "Addis Mercato",
    "Shola Market",
    "Merkato",
    "Bahir Dar",
    "Hawassa",
    "Mekele",
    "Dire Dawa",
];

/// Price of a crop at one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub market: String,
    pub price: f64,
}

/// Prices for one crop, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropPrices {
    pub crop: String,
    pub unit: String,
    pub currency: String,
    pub markets: Vec<MarketPrice>,
}

/// Result of a board lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarketLookup {
    /// No crop requested: what the board knows about
    Available { available_crops: Vec<String> },
    /// A crop matched
    Found(CropPrices),
    /// Nothing matched the query
    NotFound {
        error: String,
        available_crops: Vec<String>,
    },
}

/// Crop price lists in board order
#[derive(Debug, Clone, PartialEq)]
pub struct MarketBoard {
    crops: Vec<(String, Vec<MarketPrice>)>,
}

impl Default for MarketBoard {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MarketBoard {
    /// Simulated board: base per-quintal price per crop with a fixed spread
    /// across the seven markets
    pub fn builtin() -> Self {
        const BASE_PRICES: [(&str, f64); 6] = [
            ("Teff", 4500.0),
            ("Maize", 1800.0),
            ("Wheat", 2200.0),
            ("Barley", 2000.0),
            ("Sorghum", 1600.0),
            ("Coffee", 12000.0),
        ];
        const SPREAD: [f64; 7] = [0.04, -0.02, 0.03, -0.05, 0.0, -0.03, 0.02];

        let crops = BASE_PRICES
            .iter()
            .map(|&(crop, base)| {
                let markets = ETHIOPIAN_MARKETS
                    .iter()
                    .zip(SPREAD)
                    .map(|(&market, spread)| MarketPrice {
                        market: market.to_string(),
                        price: (base * (1.0 + spread)).round(),
                    })
                    .collect();
                (crop.to_string(), markets)
            })
            .collect();

        Self { crops }
    }

    /// Load a board from `{"crops": {"Teff": [{"market": ..., "price": ...}]}}`
    ///
    /// Crop order in the file is the board order.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PlantDoctorError::Config(format!("Market data source {} not found: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| PlantDoctorError::Config(format!("Invalid market data {}: {e}", path.display())))
    }

    /// Parse board JSON
    pub fn parse(json: &str) -> Result<Self> {
        let mut root: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let crops = match root.remove("crops") {
            Some(serde_json::Value::Object(crops)) => crops,
            _ => {
                return Err(PlantDoctorError::Serialization(
                    "expected a \"crops\" object".to_string(),
                ))
            }
        };

        let crops = crops
            .into_iter()
            .map(|(crop, prices)| Ok((crop, serde_json::from_value(prices)?)))
            .collect::<Result<Vec<(String, Vec<MarketPrice>)>>>()?;

        Ok(Self { crops })
    }

    /// Crop names in board order
    pub fn crops(&self) -> Vec<String> {
        self.crops.iter().map(|(crop, _)| crop.clone()).collect()
    }

    /// Look up prices
    ///
    /// Without a query, lists the crops. With one, picks the first crop whose
    /// name contains it, ignoring case.
    pub fn lookup(&self, crop: Option<&str>) -> MarketLookup {
        let query = match crop.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q,
            None => {
                return MarketLookup::Available {
                    available_crops: self.crops(),
                }
            }
        };

        let needle = query.to_lowercase();
        let Some((name, prices)) = self
            .crops
            .iter()
            .find(|(name, _)| name.to_lowercase().contains(&needle))
        else {
            return MarketLookup::NotFound {
                error: format!("No data found for '{}'", query),
                available_crops: self.crops(),
            };
        };

        let mut markets = prices.clone();
        markets.sort_by(|a, b| b.price.total_cmp(&a.price));

        MarketLookup::Found(CropPrices {
            crop: name.clone(),
            unit: PRICE_UNIT.to_string(),
            currency: CURRENCY.to_string(),
            markets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_list_crops() {
        let board = MarketBoard::builtin();
        match board.lookup(None) {
            MarketLookup::Available { available_crops } => {
                assert_eq!(available_crops.len(), 6);
                assert_eq!(available_crops[0], "Teff");
            }
            other => panic!("unexpected lookup result: {:?}", other),
        }
        assert!(matches!(board.lookup(Some("  ")), MarketLookup::Available { .. }));
    }

    #[test]
    fn test_case_insensitive_substring_match() {
        let board = MarketBoard::builtin();
        let MarketLookup::Found(prices) = board.lookup(Some("coff")) else {
            panic!("coffee should match");
        };

        assert_eq!(prices.crop, "Coffee");
        assert_eq!(prices.unit, "Quintal (100KG)");
        assert_eq!(prices.currency, "ETB");
        assert_eq!(prices.markets.len(), 7);
        assert!(prices
            .markets
            .windows(2)
            .all(|w| w[0].price >= w[1].price));
        assert_eq!(prices.markets[0].market, "Addis Mercato");
    }

    #[test]
    fn test_unknown_crop() {
        let board = MarketBoard::builtin();
        match board.lookup(Some("Avocado")) {
            MarketLookup::NotFound {
                error,
                available_crops,
            } => {
                assert_eq!(error, "No data found for 'Avocado'");
                assert_eq!(available_crops.len(), 6);
            }
            other => panic!("unexpected lookup result: {:?}", other),
        }
    }

    #[test]
    fn test_file_board_keeps_order() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"crops": {{
                "Wheat": [{{"market": "Hawassa", "price": 2100}}],
                "Barley": [{{"market": "Merkato", "price": 1900}}, {{"market": "Mekele", "price": 2050}}]
            }}}}"#
        )
        .unwrap();

        let board = MarketBoard::from_path(file.path()).unwrap();
        assert_eq!(board.crops(), vec!["Wheat", "Barley"]);

        // "e" matches both; the first in board order wins
        let MarketLookup::Found(prices) = board.lookup(Some("E")) else {
            panic!("expected a match");
        };
        assert_eq!(prices.crop, "Wheat");

        let MarketLookup::Found(prices) = board.lookup(Some("barley")) else {
            panic!("expected a match");
        };
        assert_eq!(prices.markets[0].market, "Mekele");
    }

    #[test]
    fn test_missing_or_malformed_file() {
        assert!(MarketBoard::from_path("/no/market_mock.json").is_err());
        assert!(MarketBoard::parse(r#"{"prices": []}"#).is_err());
        assert!(MarketBoard::parse(r#"{"crops": {"Teff": [{"market": "Merkato"}]}}"#).is_err());
    }

    #[test]
    fn test_lookup_serializes_like_a_response() {
        let json = serde_json::to_value(MarketBoard::builtin().lookup(Some("teff"))).unwrap();
        assert_eq!(json["crop"], "Teff");
        assert_eq!(json["markets"].as_array().unwrap().len(), 7);
    }
}
