//! Application core — orchestration, zero direct I/O.
//!
//! This module contains the measurement orchestration: the per-tick
//! [`service`], the caller-facing [`engine`] with its worker lifecycle, and
//! the liveness [`watchdog`].  All interaction with hardware happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable against a simulated cuff.

pub mod engine;
pub mod events;
pub mod ports;
pub mod service;
pub mod watchdog;
