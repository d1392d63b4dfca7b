// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod batch;
pub mod cancellation;
pub mod coalescing;
pub mod codecs;
pub mod expiry;
pub mod fault_policy;
pub mod utils;

pub use utils::*;
