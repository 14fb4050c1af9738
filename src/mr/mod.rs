pub mod app;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod partition;
pub mod rpc;
pub mod store;
pub mod sweeper;
pub mod worker;
