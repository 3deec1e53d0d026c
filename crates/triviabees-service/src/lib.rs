#[macro_use]
pub mod metrics;

pub mod client;
pub mod config;
pub mod coordinator;
pub mod generators;
pub mod logging;
pub mod types;
pub mod utils;

#[cfg(test)]
#[allow(unused)]
pub mod test;
