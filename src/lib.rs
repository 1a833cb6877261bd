pub mod actors;
pub mod client;
pub mod config;
pub mod probe;
pub mod protocol;
pub mod status;
pub mod store;
pub mod topology;
pub mod util;

#[cfg(feature = "api")]
pub mod api;
