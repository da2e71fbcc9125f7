//! Advisory helpers served next to the diagnosis
//!
//! - `market`: crop prices across Ethiopian markets, best price first
//! - `weather`: watering advice from a weather reading

pub mod market;
pub mod weather;

pub use market::{CropPrices, MarketBoard, MarketLookup, MarketPrice};
pub use weather::{AlertColor, WeatherAdvisory, WeatherCondition};
