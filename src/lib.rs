pub mod api;
pub mod clients;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod models;
pub mod rate_limit;
pub mod store;
pub mod utils;
pub mod worker;
