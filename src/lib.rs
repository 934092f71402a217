pub mod benchmark;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invoker;
pub mod job;
pub mod logging;
pub mod report;
pub mod samples;
