//! Reconciliation engine: scheduler, update detection and aggregation.
//!
//! # Responsibility
//! - Decide when to check (`scheduler`), what is new for each subscription
//!   (`detector`), and who gets told about it (`aggregator`).
//! - Contain every per-subscription and per-batch failure at its loop
//!   boundary so one bad call never aborts a run.
//!
//! # Data flow
//! `Scheduler` tick -> `Reconciler::run_pass` -> `UpdateDetector::check`
//! per subscription -> `UpdateAggregator` -> `BatchDispatcher` -> `Notifier`.

pub mod aggregator;
pub mod detector;
pub mod error;
pub mod ports;
pub mod run;
pub mod scheduler;
