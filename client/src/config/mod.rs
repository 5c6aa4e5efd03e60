use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CLIENT_ROOT_DIR: &str = ".notary-client";
const CLIENT_CONFIG_FILE: &str = "client.toml";
const DEFAULT_LOW_WATER_MARK: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("ConfigDoesNotExist: '{0}'")]
    DoesNotExist(String),
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Home directory not found")]
    NoHomeDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub client: ClientConfiguration,
    pub storage: StorageConfiguration,
    pub numbers: NumbersConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    /// Name of this client instance, also the name of its directory under the root.
    pub name: String,
    /// Box receipts kept in memory after hydration.
    pub receipt_cache_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfiguration {
    pub sqlite_path: String,
    pub create_if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumbersConfiguration {
    /// Below this many available numbers the client should ask for more.
    pub low_water_mark: usize,
}

impl Configuration {
    pub fn new(name: &str, root: PathBuf) -> Self {
        let sqlite_path = root.join(name).join("client.sqlite");
        Configuration {
            client: ClientConfiguration {
                name: name.to_string(),
                receipt_cache_size: 1000,
            },
            storage: StorageConfiguration {
                sqlite_path: sqlite_path.to_string_lossy().to_string(),
                create_if_not_exists: true,
            },
            numbers: NumbersConfiguration {
                low_water_mark: DEFAULT_LOW_WATER_MARK,
            },
        }
    }

    pub fn client_root_dir() -> Result<PathBuf, ConfigurationError> {
        dirs::home_dir()
            .map(|home| home.join(CLIENT_ROOT_DIR))
            .ok_or(ConfigurationError::NoHomeDir)
    }

    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Configuration, ConfigurationError> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigurationError::DoesNotExist(
                path.to_string_lossy().to_string(),
            ));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        config.try_deserialize().map_err(|err| err.into())
    }

    pub fn try_load_from_home_dir(name: &str) -> Result<Configuration, ConfigurationError> {
        let path = Self::client_root_dir()?.join(name).join(CLIENT_CONFIG_FILE);
        Self::try_load(path)
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<(), ConfigurationError> {
        let config = toml::to_string(&self)?;

        let config = format!(
            "#This file is generated by the client and overwritten when settings change\n{config}",
        );

        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(config.as_bytes())?;

        Ok(())
    }

    pub fn try_write_home_dir(&self) -> Result<(), ConfigurationError> {
        let path = Self::client_root_dir()?
            .join(&self.client.name)
            .join(CLIENT_CONFIG_FILE);
        self.try_write(path)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_write_then_load() {
        let root = std::env::temp_dir().join(format!("notary-client-{}", Uuid::new_v4()));
        let mut configuration = Configuration::new("alice", root.clone());
        configuration.numbers.low_water_mark = 12;
        let path = root.join("alice").join(CLIENT_CONFIG_FILE);

        configuration.try_write(path.clone()).unwrap();
        let loaded = Configuration::try_load(path).unwrap();
        assert_eq!(loaded, configuration);

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join(format!("missing-{}.toml", Uuid::new_v4()));
        assert_matches!(
            Configuration::try_load(path),
            Err(ConfigurationError::DoesNotExist(_))
        );
    }
}
