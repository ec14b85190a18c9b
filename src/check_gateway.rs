//! Check gateways and the runner that drives them.
//!
//! Gateways are the opaque OCR, liveness and face-match detectors supplied by
//! the embedding application. The runner feeds them artifact bytes under a
//! timeout and a cancellation signal and records what they report through the
//! session manager.

pub mod gateway;
pub mod runner;

pub use gateway::{CheckDetails, CheckGateway, CheckInput, CheckReport, Score};
pub use runner::{CheckRun, CheckRunner, CheckTarget};
