//! Weather-driven watering advice
//!
//! Rule-based: rain means no irrigation, heat above 27 °C means water now,
//! anything else is routine care. Alert and recommendation texts are in
//! Amharic for the farmer-facing UI.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Above this temperature (°C) fields need watering
pub const HEAT_THRESHOLD_C: i32 = 27;

/// Range simulated temperatures are drawn from (°C)
pub const SIMULATED_TEMPERATURE_C: std::ops::RangeInclusive<i32> = 18..=30;

/// Location reported when none is given
pub const DEFAULT_LOCATION: &str = "Central Ethiopia";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Sunny,
    Rainy,
    Cloudy,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 3] = [
        WeatherCondition::Sunny,
        WeatherCondition::Rainy,
        WeatherCondition::Cloudy,
    ];
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherCondition::Sunny => write!(f, "Sunny"),
            WeatherCondition::Rainy => write!(f, "Rainy"),
            WeatherCondition::Cloudy => write!(f, "Cloudy"),
        }
    }
}

impl std::str::FromStr for WeatherCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sunny" => Ok(WeatherCondition::Sunny),
            "rainy" => Ok(WeatherCondition::Rainy),
            "cloudy" => Ok(WeatherCondition::Cloudy),
            other => Err(format!(
                "unknown weather condition '{}' (expected sunny, rainy or cloudy)",
                other
            )),
        }
    }
}

/// Colour hint for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertColor {
    Blue,
    Red,
    Green,
}

/// Advice for one location and weather reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAdvisory {
    pub location: String,
    /// Temperature in °C
    pub temperature_c: i32,
    pub condition: WeatherCondition,
    pub alert_amharic: String,
    pub recommendation_amharic: String,
    pub ui_color: AlertColor,
}

impl WeatherAdvisory {
    /// Advice for a known condition and temperature
    pub fn for_conditions(location: &str, condition: WeatherCondition, temperature_c: i32) -> Self {
        let (alert, recommendation, color) = if condition == WeatherCondition::Rainy {
            (
                "አያጠጡ - ዝናብ ይጠበቃል",
                "ዛሬ ዝናብ ስለሚጠበቅ መስኖ መጠቀም አያስፈልግዎትም።",
                AlertColor::Blue,
            )
        } else if temperature_c > HEAT_THRESHOLD_C {
            (
                "ማጠጣት ያስፈልጋል",
                "ከፍተኛ ሙቀት ስላለ እባክዎን ማሳዎን ያጠጡ።",
                AlertColor::Red,
            )
        } else {
            (
                "መደበኛ እንክብካቤ",
                "አየሩ መደበኛ ነው። መደበኛ ክትትልዎን ይቀጥሉ።",
                AlertColor::Green,
            )
        };

        Self {
            location: location.to_string(),
            temperature_c,
            condition,
            alert_amharic: alert.to_string(),
            recommendation_amharic: recommendation.to_string(),
            ui_color: color,
        }
    }

    /// Advice for a simulated reading drawn from `rng`
    pub fn simulate<R: Rng>(location: &str, rng: &mut R) -> Self {
        let condition = WeatherCondition::ALL[rng.gen_range(0..WeatherCondition::ALL.len())];
        let temperature = rng.gen_range(SIMULATED_TEMPERATURE_C);
        Self::for_conditions(location, condition, temperature)
    }

    /// Temperature formatted for display, e.g. `"24°C"`
    pub fn temperature_label(&self) -> String {
        format!("{}°C", self.temperature_c)
    }

    /// Same condition at another temperature
    pub fn with_temperature(&self, temperature_c: i32) -> Self {
        Self::for_conditions(&self.location, self.condition, temperature_c)
    }

    /// Same temperature under another condition
    pub fn with_condition(&self, condition: WeatherCondition) -> Self {
        Self::for_conditions(&self.location, condition, self.temperature_c)
    }

    /// Whether the farmer should irrigate today
    pub fn needs_watering(&self) -> bool {
        self.ui_color == AlertColor::Red
    }
}
