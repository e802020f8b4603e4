//! Measured quantities a query can select, and the two selection modes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A meteorological quantity reported by the Antarctic stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Atmospheric pressure in hPa.
    Pressure,
    /// Wind speed in m/s.
    WindSpeed,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Temperature, Field::Pressure, Field::WindSpeed];

    pub(crate) fn key_segment(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Pressure => "pressure",
            Field::WindSpeed => "wind_speed",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_segment())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown field '{0}', expected one of temperature, pressure, wind_speed")]
pub struct ParseFieldError(pub String);

/// Parses a field name case-insensitively, accepting the short upstream
/// column names (`temp`, `pres`, `vel`) and `speed` as aliases.
impl FromStr for Field {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Field::Temperature),
            "pressure" | "pres" => Ok(Field::Pressure),
            "wind_speed" | "windspeed" | "wind" | "speed" | "vel" => Ok(Field::WindSpeed),
            _ => Err(ParseFieldError(s.to_string())),
        }
    }
}

/// Which fields a query wants back.
///
/// `All` is the "full fields" mode; `Selected` is the "selected fields" mode.
/// Both share the same cache and aggregation pipeline and only differ in the
/// field component of the cache key and in which bucket values are filled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldSelection {
    #[default]
    All,
    Selected(BTreeSet<Field>),
}

impl FieldSelection {
    /// Builds a selection from any list of fields, removing duplicates.
    /// A list naming every field is the same request as [`FieldSelection::All`].
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let set: BTreeSet<Field> = fields.into_iter().collect();
        if set.len() == Field::ALL.len() {
            FieldSelection::All
        } else {
            FieldSelection::Selected(set)
        }
    }

    /// Parses a list of field names, see [`Field::from_str`].
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ParseFieldError> {
        let fields = names
            .iter()
            .map(|n| n.as_ref().parse::<Field>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_fields(fields))
    }

    pub fn contains(&self, field: Field) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Selected(set) => set.contains(&field),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldSelection::Selected(set) if set.is_empty())
    }

    /// The selected fields in canonical (sorted) order.
    pub fn fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.contains(*f))
            .collect()
    }
}
