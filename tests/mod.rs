mod common;

mod batch_tests;
mod dispatcher_tests;
mod gateway_tests;
mod statistics_tests;
