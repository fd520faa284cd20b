//! Pipeline target locations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The location used when none is given.
pub const DEFAULT_LOCATION: &str = "London,uk";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location is empty")]
    Empty,
    #[error("location '{0}' has no country code (expected 'City,cc')")]
    MissingCountry(String),
}

/// A city plus its country code, written `City,cc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub country: String,
}

impl Location {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocationError::Empty);
        }
        let (city, country) = s
            .split_once(',')
            .ok_or_else(|| LocationError::MissingCountry(s.to_string()))?;
        let (city, country) = (city.trim(), country.trim());
        if city.is_empty() {
            return Err(LocationError::Empty);
        }
        if country.is_empty() {
            return Err(LocationError::MissingCountry(s.to_string()));
        }
        Ok(Self::new(city, country))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.city, self.country)
    }
}

/// A selectable location with a display label.
#[derive(Debug, Clone, Serialize)]
pub struct LocationPreset {
    pub value: &'static str,
    pub label: &'static str,
}

/// The locations offered by the dashboard.
pub fn presets() -> Vec<LocationPreset> {
    vec![
        LocationPreset { value: "London,uk", label: "London, UK" },
        LocationPreset { value: "New York,us", label: "New York, USA" },
        LocationPreset { value: "Tokyo,jp", label: "Tokyo, Japan" },
        LocationPreset { value: "Paris,fr", label: "Paris, France" },
        LocationPreset { value: "Sydney,au", label: "Sydney, Australia" },
    ]
}
