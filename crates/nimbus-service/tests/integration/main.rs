// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod coalescing;
pub mod openmeteo;
pub mod utils;
pub mod weatherapi;

pub use utils::*;
