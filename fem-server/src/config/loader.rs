use once_cell::sync::Lazy;
use std::{fs, path::PathBuf};
use thiserror::Error;

use fem_core::FemConfig;
use fem_model::TenantId;

use super::sources::{EnvConfig, FileConfig};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![PathBuf::from("fem.toml"), PathBuf::from("config/fem.toml")]
});

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub fem: FemConfig,
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: ServerConfig,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Tenants given on the command line; replace every other source.
    pub tenants: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no database URL: set DATABASE_URL or [database].url")]
    MissingDatabaseUrl,
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        let env_file_loaded = match loaded {
            Ok(loaded) => loaded,
            Err(dotenvy::Error::Io(_)) => false,
            Err(err) => return Err(err.into()),
        };

        let mut load = self.load_from(EnvConfig::gather())?;
        load.config.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolve against an explicit environment snapshot.
    pub fn load_from(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, config_path) = self.load_file_config(&env)?;
        let mut warnings = Vec::new();
        if config_path.is_none() {
            warnings.push(
                "No fem.toml detected; falling back to environment variables"
                    .to_string(),
            );
        }

        let FileConfig { database, mut fem } = file.unwrap_or_default();

        let database_url = env
            .database_url
            .or(database.url)
            .ok_or(ConfigLoadError::MissingDatabaseUrl)?;
        let max_connections = env
            .database_max_connections
            .or(database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        if let Some(tenants) = self.options.tenants.clone().or(env.tenants) {
            fem.tenants = tenants.into_iter().map(TenantId::new).collect();
        }
        if fem.tenants.is_empty() {
            warnings.push(
                "No tenant configured; the dissemination drain will idle"
                    .to_string(),
            );
        }

        Ok(ConfigLoad {
            config: ServerConfig {
                database_url,
                max_connections,
                fem,
                config_path,
                env_file_loaded: false,
            },
            warnings,
        })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok((Some(file), Some(path)))
    }
}
