//! Defines the Antarctic weather stations served by this crate.
//!
//! Stations are fixed reference data: the catalogue is built once and never
//! mutated.

use serde::{Deserialize, Serialize};

/// A weather station operated by AEMET in Antarctica.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Station {
    /// The AEMET station identifier (e.g., "89064").
    pub id: String,
    /// Human readable station name, as returned in responses.
    pub name: String,
    /// Geographical location of the station.
    pub location: Location,
}

/// Represents the geographical location of a weather station.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Location {
    /// Latitude in decimal degrees (negative for South).
    pub latitude: f64,
    /// Longitude in decimal degrees (negative for West).
    pub longitude: f64,
    /// Elevation above sea level in meters, if known.
    pub elevation: Option<i32>,
}

impl Station {
    fn new(id: &str, name: &str, latitude: f64, longitude: f64, elevation: Option<i32>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location: Location {
                latitude,
                longitude,
                elevation,
            },
        }
    }

    /// Returns every station known to the engine.
    pub fn catalogue() -> Vec<Station> {
        vec![
            Station::new("89064", "Juan Carlos I", -62.6631, -60.3897, Some(12)),
            Station::new(
                "89064R",
                "Juan Carlos I (radiometric)",
                -62.6631,
                -60.3897,
                Some(12),
            ),
            // Superseded by 89064R on 2007-03-08.
            Station::new(
                "89064RA",
                "Juan Carlos I (radiometric, until 2007-03-08)",
                -62.6631,
                -60.3897,
                Some(12),
            ),
            Station::new("89070", "Gabriel de Castilla", -62.9771, -60.6753, Some(15)),
        ]
    }

    /// Normalizes a station identifier: surrounding whitespace removed, uppercased.
    pub fn normalize_id(id: &str) -> String {
        id.trim().to_ascii_uppercase()
    }

    /// Finds a station in the catalogue, ignoring case and surrounding whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use antarctic_meteo::Station;
    ///
    /// let station = Station::lookup(" 89064r ").unwrap();
    /// assert_eq!(station.id, "89064R");
    /// assert!(Station::lookup("10637").is_none());
    /// ```
    pub fn lookup(id: &str) -> Option<Station> {
        let id = Self::normalize_id(id);
        Self::catalogue().into_iter().find(|s| s.id == id)
    }
}
