//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a layer of the engine
//! against the simulated cuff.  All tests run on the host with no real
//! hardware required.

#![cfg(not(target_os = "espidf"))]

mod engine_tests;
mod mock_hw;
mod service_tests;
