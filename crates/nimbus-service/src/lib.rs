//! Weather data proxying and caching.
//!
//! The heart of this crate is the [`caching::CoalescingStore`], a TTL cache which deduplicates
//! concurrent fetches of the same key. The [`services::WeatherService`] puts one such store in
//! front of each kind of upstream request issued through a [`providers::WeatherProvider`].

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod location;
pub mod providers;
pub mod services;
pub mod types;
pub mod units;
pub mod utils;
