//! Multi-cloud deployment orchestrator
//!
//! Deploys one source repository to several cloud providers at once. Each provider
//! attempt runs independently on a worker pool; the aggregator folds their outcomes into
//! the deployment's overall status.

pub mod app;
pub mod deploy;
pub mod drivers;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
