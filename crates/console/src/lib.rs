pub mod config;
pub mod error;
pub mod identifier;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod mirror;
pub mod remote;
pub mod schema;
pub mod server;

#[cfg(test)]
mod test_utils;
