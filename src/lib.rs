pub mod client;
pub mod config;
pub mod errors;
pub mod geo;
pub mod metrics;
pub mod outcome;
pub mod percentiles;
pub mod persona;
pub mod points_query;
pub mod report;
pub mod requests;
pub mod scheduler;
pub mod utils;
pub mod vrp;
pub mod worker;
pub mod yaml_config;
