pub mod auth;
pub mod client;
pub mod config;
pub mod dsl;
pub mod errors;
pub mod executor;
pub mod journey;
pub mod metrics;
pub mod population;
pub mod reporter;
pub mod result;
pub mod task;
pub mod utils;
pub mod worker;
pub mod workload;
