//! Common test utilities for tripdata-sync integration tests

#[allow(dead_code)]
pub mod env;
#[allow(dead_code)]
pub mod witness;

pub use env::*;
#[allow(unused_imports)]
pub use witness::*;
