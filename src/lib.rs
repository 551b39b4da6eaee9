//! Unsupervised anomaly detection for customer-service interactions.
//!
//! Records flow through a fitted [`pipeline::FeaturePipeline`], are scored by an
//! isolation forest and a local outlier factor model, and are fused by the
//! ensemble combiner. The [`registry::ModelRegistry`] holds the active artifacts
//! for the HTTP service and swaps them atomically on reload.

pub mod artifacts;
pub mod config;
pub mod db;
pub mod detector;
pub mod ensemble;
pub mod error;
pub mod evaluate;
pub mod iforest;
pub mod lof;
pub mod mock;
pub mod models;
pub mod pipeline;
pub mod predict;
pub mod registry;
pub mod report;
pub mod server;
pub mod table;
pub mod telemetry;
pub mod threshold;
pub mod train;

pub use error::{Error, Result};
