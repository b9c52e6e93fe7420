//! Temperature unit conversion.
//!
//! Providers always report degrees Celsius. Conversion happens on the way out, after the cache,
//! so both units are served from the same cache entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CurrentWeather, DailyEntry, DayReport, Forecast, HourlyEntry, HourlyForecast};

/// The unit temperatures are reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Converts a temperature in degrees Celsius to this unit.
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => f.write_str("celsius"),
            TemperatureUnit::Fahrenheit => f.write_str("fahrenheit"),
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Weather payloads whose temperatures can be converted.
///
/// Payloads are expected to hold degrees Celsius. Converting to [`TemperatureUnit::Celsius`]
/// returns the payload unchanged, while other units convert every temperature and record the unit
/// in `temperatureUnit`.
pub trait ConvertTemperature: Sized {
    fn convert_to(self, unit: TemperatureUnit) -> Self;
}

fn convert_hourly(hourly: &mut [HourlyEntry], unit: TemperatureUnit) {
    for hour in hourly {
        hour.temp = unit.from_celsius(hour.temp);
        hour.feels_like = unit.from_celsius(hour.feels_like);
    }
}

fn convert_daily(daily: &mut [DailyEntry], unit: TemperatureUnit) {
    for day in daily {
        day.temp.day = unit.from_celsius(day.temp.day);
        day.temp.min = unit.from_celsius(day.temp.min);
        day.temp.max = unit.from_celsius(day.temp.max);
    }
}

impl ConvertTemperature for CurrentWeather {
    fn convert_to(mut self, unit: TemperatureUnit) -> Self {
        if unit == TemperatureUnit::Celsius {
            return self;
        }
        self.current.temp = unit.from_celsius(self.current.temp);
        self.current.feels_like = unit.from_celsius(self.current.feels_like);
        self.temperature_unit = Some(unit);
        self
    }
}

impl ConvertTemperature for Forecast {
    fn convert_to(mut self, unit: TemperatureUnit) -> Self {
        if unit == TemperatureUnit::Celsius {
            return self;
        }
        convert_hourly(&mut self.hourly, unit);
        convert_daily(&mut self.daily, unit);
        self.temperature_unit = Some(unit);
        self
    }
}

impl ConvertTemperature for HourlyForecast {
    fn convert_to(mut self, unit: TemperatureUnit) -> Self {
        if unit == TemperatureUnit::Celsius {
            return self;
        }
        convert_hourly(&mut self.hourly, unit);
        self.temperature_unit = Some(unit);
        self
    }
}

impl ConvertTemperature for DayReport {
    /// Converts the hourly entries, and adds `*temp_f` fields to the summary next to the
    /// untouched `*temp_c` ones.
    fn convert_to(mut self, unit: TemperatureUnit) -> Self {
        if unit == TemperatureUnit::Celsius {
            return self;
        }
        convert_hourly(&mut self.hourly, unit);
        let summary = &mut self.summary;
        summary.maxtemp_f = Some(celsius_to_fahrenheit(summary.maxtemp_c));
        summary.mintemp_f = Some(celsius_to_fahrenheit(summary.mintemp_c));
        summary.avgtemp_f = Some(celsius_to_fahrenheit(summary.avgtemp_c));
        self.temperature_unit = Some(unit);
        self
    }
}
