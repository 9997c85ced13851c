//! Deployment module

pub mod aggregator;
pub mod archive;
pub mod compose;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod sink;
pub mod stager;
