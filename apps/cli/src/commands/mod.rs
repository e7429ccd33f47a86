pub mod config;
pub mod rotate;
