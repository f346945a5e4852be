//! Process configuration read once from the environment.

use std::{path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::accident::{Accident, AccidentId};

const DEFAULT_SEED: &str = include_str!("../data/seed.json");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read seed file {path}: {source}")]
    SeedRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("seed data is not a JSON array of records: {0}")]
    SeedParse(#[source] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdPolicy {
    Timestamp,
    Random,
}

impl FromStr for IdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(Self::Timestamp),
            "random" => Ok(Self::Random),
            _ => Err("expected timestamp or random".to_string()),
        }
    }
}

impl IdPolicy {
    /// Neither policy guarantees uniqueness.
    pub fn assign(&self, now: DateTime<Utc>) -> AccidentId {
        match self {
            Self::Timestamp => AccidentId::Int(now.timestamp_millis()),
            Self::Random => AccidentId::Int(1000 + (Uuid::new_v4().as_u128() % 9000) as i64),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreTarget {
    Empty,
    Seed,
}

impl FromStr for RestoreTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(Self::Empty),
            "seed" => Ok(Self::Seed),
            _ => Err("expected empty or seed".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    File {
        path: PathBuf,
    },
    Mongo {
        uri: String,
        database: String,
        collection: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub upload_preset: Option<String>,
    pub folder: String,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// How many consecutive ports to try when the configured one is taken.
    pub port_attempts: u16,
    pub store: StoreConfig,
    pub id_policy: IdPolicy,
    pub restore_target: RestoreTarget,
    pub seed_file: Option<PathBuf>,
    pub require_fields: bool,
    pub media: MediaConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let store = match var("STORE").as_deref().unwrap_or("file") {
            "file" => StoreConfig::File {
                path: var("DATA_FILE")
                    .map_or_else(|| PathBuf::from("data/accidents.json"), PathBuf::from),
            },
            "mongo" => StoreConfig::Mongo {
                uri: var("MONGODB_URI")
                    .unwrap_or_else(|| String::from("mongodb://localhost:27017")),
                database: var("MONGODB_DATABASE").unwrap_or_else(|| String::from("incidents")),
                collection: var("MONGODB_COLLECTION")
                    .unwrap_or_else(|| String::from("accidents")),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORE",
                    value: other.to_string(),
                    reason: "expected file or mongo".to_string(),
                })
            }
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| String::from("127.0.0.1")),
            port: parse_var("PORT", var("PORT"), 5000)?,
            port_attempts: parse_var("PORT_ATTEMPTS", var("PORT_ATTEMPTS"), 10)?,
            store,
            id_policy: parse_var("ID_POLICY", var("ID_POLICY"), IdPolicy::Timestamp)?,
            restore_target: parse_var(
                "RESTORE_TARGET",
                var("RESTORE_TARGET"),
                RestoreTarget::Seed,
            )?,
            seed_file: var("SEED_FILE").map(PathBuf::from),
            require_fields: parse_var("REQUIRE_FIELDS", var("REQUIRE_FIELDS"), false)?,
            media: MediaConfig {
                cloud_name: var("CLOUDINARY_CLOUD_NAME"),
                api_key: var("CLOUDINARY_API_KEY"),
                api_secret: var("CLOUDINARY_API_SECRET"),
                upload_preset: var("CLOUDINARY_UPLOAD_PRESET"),
                folder: var("CLOUDINARY_FOLDER").unwrap_or_else(|| String::from("accidentes")),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", var("MAX_UPLOAD_BYTES"), 10 << 20)?,
            },
        })
    }

    /// The collection written by "restore defaults".
    pub fn restore_records(&self) -> Result<Vec<Accident>, ConfigError> {
        match self.restore_target {
            RestoreTarget::Empty => Ok(Vec::new()),
            RestoreTarget::Seed => {
                let contents = match &self.seed_file {
                    Some(path) => std::fs::read_to_string(path).map_err(|source| {
                        ConfigError::SeedRead {
                            path: path.clone(),
                            source,
                        }
                    })?,
                    None => DEFAULT_SEED.to_string(),
                };
                serde_json::from_str(&contents).map_err(ConfigError::SeedParse)
            }
        }
    }
}

fn parse_var<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|error: T::Err| ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: error.to_string(),
            }),
    }
}
