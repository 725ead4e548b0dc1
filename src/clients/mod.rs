pub mod channel;
pub mod circuit_breaker;
pub mod database;
pub mod fcm;
pub mod gateway;
pub mod health;
pub mod rbmq;
pub mod redis;
pub mod template;
