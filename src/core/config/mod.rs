pub mod data;
pub mod io;
pub mod orchestrator;

pub use data::{
    path_display, ApiTokens, ConfigurationError, Settings, TranslationMode, TranslatorKind,
};
pub use io::{ConfigError, DataPaths};
pub use orchestrator::ConfigOrchestrator;
