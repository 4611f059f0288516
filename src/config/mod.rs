// src/config/mod.rs
pub mod ai;
pub mod settings;

pub use ai::AiConfig;
pub use settings::Settings;
