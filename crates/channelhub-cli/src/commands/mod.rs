pub mod analytics;
pub mod config;
pub mod integration;
pub mod plug;
pub mod refresh;
