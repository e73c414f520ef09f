pub mod loader;
pub mod sources;

pub use loader::{
    ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ServerConfig,
};
pub use sources::{EnvConfig, FileConfig, FileDatabaseConfig};
