//! Core of the Wi-Fi field survey service.
//!
//! This crate contains:
//! - **Channel model** — band classification, frequency/channel tables
//! - **Parsers** — decoders for `iw scan`, `iw survey dump` and spectrum samples
//! - **Scoring** — per-channel congestion metrics and score
//! - **Capture** — bounded execution of the diagnostic commands
//! - **Lifecycle** — point state machine and in-flight exclusion
//! - **Store** — on-disk layout of sessions, points and artifacts
//! - **Service** — the operations the HTTP façade exposes

pub mod artifact;
pub mod capture;
pub mod channels;
pub mod config;
pub mod ids;
pub mod lifecycle;
pub mod parse;
pub mod scoring;
pub mod service;
pub mod store;

pub use config::CaptureConfig;
pub use service::{ServiceError, SurveyService};
