//! Data-quality gate and payload normalization
//!
//! Every payload passes [`process::process_frame`] (normalization) and then
//! [`gate::check_frame`] (the gate) before a single row reaches a sink. The
//! vocabulary the gate enforces is data-driven: electricity and gas datasets
//! tolerate different flows and metrics, so the allowed columns/metrics/flows
//! are loaded from a per-dataset [`config::QualityConfig`], never hard-coded.

pub mod config;
pub mod gate;
pub mod process;

pub use config::{FlowRule, QualityConfig};
pub use gate::{check_frame, QualityError};
pub use process::{process_frame, ProcessReport};
