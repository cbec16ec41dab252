// Time-tracking core for the mobile client
// Shared between the `worktrack` binary and the mobile shells linking the lib

pub mod clock;
pub mod config;
pub mod gateway;
pub mod http_gateway;
pub mod models;
pub mod store;
pub mod task_cache;
pub mod tracker;
