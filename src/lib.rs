pub mod acceptance;
pub mod adapt;
pub mod config;
pub mod core;
mod dev_tools;
pub mod distributions;
pub mod dram;
pub mod error;
pub mod kernel;
pub mod position;
pub mod stats;
