/// Framework configuration loaded from TOML
pub mod config;

pub use config::{
    BoundaryConfig, DispatcherConfig, FileSystemConfig, ParsingConfig, ProviderConfig,
    ResilienceConfig,
};
