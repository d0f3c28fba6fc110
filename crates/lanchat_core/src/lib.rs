pub mod config;
pub mod logging;

pub use config::ChatConfig;
