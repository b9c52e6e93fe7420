//! Parsing of the `city` query parameter.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static COORDINATES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+\.?\d*),\s*(-?\d+\.?\d*)$").unwrap());

/// An error parsing a [`Location`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location is required")]
    Empty,
    #[error("coordinates out of range: {lat},{lon}")]
    OutOfRange { lat: f64, lon: f64 },
}

/// A place to look up weather for.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// A free-form city name, such as `"London"` or `"Bengaluru, Karnataka, India"`.
    City(String),
    /// Decimal latitude and longitude.
    Coordinates { lat: f64, lon: f64 },
}

impl Location {
    /// Parses either `"lat,lon"` coordinates or a city name.
    ///
    /// Everything that does not look like a pair of decimal numbers is taken as a city name.
    pub fn parse(input: &str) -> Result<Self, LocationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(LocationError::Empty);
        }

        let Some(captures) = COORDINATES_RE.captures(input) else {
            return Ok(Location::City(input.to_owned()));
        };

        // the regex only matches valid floats
        let (Ok(lat), Ok(lon)) = (captures[1].parse::<f64>(), captures[2].parse::<f64>()) else {
            return Ok(Location::City(input.to_owned()));
        };

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(LocationError::OutOfRange { lat, lon });
        }

        Ok(Location::Coordinates { lat, lon })
    }

    /// The query string understood by providers that accept both names and coordinates.
    pub fn query(&self) -> String {
        self.to_string()
    }

    /// The bare city name used for geocoding.
    ///
    /// Qualifiers after the first comma are dropped, since geocoders match them poorly.
    pub fn geocoding_name(&self) -> Option<&str> {
        match self {
            Location::City(city) => city.split(',').next().map(str::trim),
            Location::Coordinates { .. } => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::City(city) => f.write_str(city),
            Location::Coordinates { lat, lon } => write!(f, "{lat},{lon}"),
        }
    }
}
