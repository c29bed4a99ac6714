// Infrastructure module - External dependencies and adapters
pub mod process;
pub mod logging;
pub mod config;
