use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "LABEL_STUDIO";

pub const ENV_URL: &str = "LABEL_STUDIO_URL";
pub const ENV_API_KEY: &str = "LABEL_STUDIO_API_KEY";
pub const ENV_USERNAME: &str = "LABEL_STUDIO_USERNAME";
pub const ENV_PASSWORD: &str = "LABEL_STUDIO_PASSWORD";
pub const ENV_PROJECT_NAME: &str = "LABEL_STUDIO_PROJECT_NAME";
pub const ENV_LOCAL_FILES_SERVING_ENABLED: &str = "LABEL_STUDIO_LOCAL_FILES_SERVING_ENABLED";
pub const ENV_LOCAL_FILES_DOCUMENT_ROOT: &str = "LABEL_STUDIO_LOCAL_FILES_DOCUMENT_ROOT";

/// Raw configuration as read from config files and `LABEL_STUDIO_*` variables.
///
/// Every value is optional here; the accessors below decide what is required
/// for a given operation and report all missing keys at once.
#[derive(Clone, Default, Deserialize)]
pub struct Conf {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project_name: Option<String>,
    pub local_files_serving_enabled: Option<String>,
    pub local_files_document_root: Option<String>,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Settings needed to talk to the labeling service.
#[derive(Clone)]
pub struct ServiceSettings {
    pub url: String,
    pub api_key: String,
    // Validated as present but not used for authentication; only the API key is.
    pub username: String,
    pub password: String,
    pub project_name: String,
}

#[derive(Debug, Clone)]
pub struct LocalFiles {
    pub serving_enabled: String,
    pub document_root: PathBuf,
}

fn default_log_format() -> String {
    "full".to_string()
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Conf {
    /// Load from the given config files (missing files are skipped) and the
    /// process environment.
    pub fn new(config_files: &[String]) -> Result<Self> {
        Self::from_sources(config_files, None)
    }

    /// Like [`Conf::new`] but reads variables from `env` instead of the
    /// process environment when provided.
    pub fn from_sources(
        config_files: &[String],
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();
        for file in config_files {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let conf = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
            .build()?
            .try_deserialize()?;
        Ok(conf)
    }

    pub fn require_service(&self) -> Result<ServiceSettings> {
        let fields = [
            (ENV_URL, present(&self.url)),
            (ENV_API_KEY, present(&self.api_key)),
            (ENV_USERNAME, present(&self.username)),
            (ENV_PASSWORD, present(&self.password)),
            (ENV_PROJECT_NAME, present(&self.project_name)),
        ];
        match fields {
            [(_, Some(url)), (_, Some(api_key)), (_, Some(username)), (_, Some(password)), (_, Some(project_name))] => {
                tracing::info!("Labeling service configuration is complete");
                Ok(ServiceSettings {
                    url: url.to_string(),
                    api_key: api_key.to_string(),
                    username: username.to_string(),
                    password: password.to_string(),
                    project_name: project_name.to_string(),
                })
            }
            _ => Err(missing_error(&fields)),
        }
    }

    pub fn local_files(&self) -> Result<LocalFiles> {
        let fields = [
            (
                ENV_LOCAL_FILES_SERVING_ENABLED,
                present(&self.local_files_serving_enabled),
            ),
            (
                ENV_LOCAL_FILES_DOCUMENT_ROOT,
                present(&self.local_files_document_root),
            ),
        ];
        match fields {
            [(_, Some(serving_enabled)), (_, Some(document_root))] => Ok(LocalFiles {
                serving_enabled: serving_enabled.to_string(),
                document_root: PathBuf::from(document_root),
            }),
            _ => Err(missing_error(&fields)),
        }
    }
}

fn missing_error(fields: &[(&str, Option<&str>)]) -> Error {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    tracing::error!(missing = %missing.join(", "), "Required configuration is missing");
    Error::Configuration { missing }
}
