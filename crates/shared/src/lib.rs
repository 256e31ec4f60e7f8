pub mod catalog;
pub mod chat;
pub mod config;
pub mod config_env;
pub mod llm;
pub mod models;
pub mod portfolio;
pub mod session;
pub mod throttle;
pub mod timezone;
