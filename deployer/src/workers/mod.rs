//! Background workers

pub mod dispatcher;
pub mod queue;
pub mod runner;
pub mod sweeper;
