pub mod config;
pub mod controller;

pub use config::Courier;
