// Configuration loading

pub mod settings;

pub use settings::{ConfigError, Settings, Stage, StoreSettings};
