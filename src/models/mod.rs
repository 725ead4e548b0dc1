pub mod audit;
pub mod batch;
pub mod channel;
pub mod circuit_breaker;
pub mod health;
pub mod log;
pub mod recipient;
pub mod request;
pub mod response;
pub mod retry;
pub mod statistics;
pub mod status;
pub mod template;
