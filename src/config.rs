use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};

pub static CONFIG_FILE_NAME: &str = "application.yml";

/// Driver reported for configurations built from `DB_*` variables.
pub static ENV_DRIVER: &str = "com.mysql.cj.jdbc.Driver";

static URL_PREFIX: &str = "jdbc:mysql://";

pub static DB_HOST: &str = "DB_HOST";
pub static DB_PORT: &str = "DB_PORT";
pub static DB_DATABASE: &str = "DB_DATABASE";
pub static DB_USERNAME: &str = "DB_USERNAME";
pub static DB_PASSWORD: &str = "DB_PASSWORD";

const ENV_PARAMETERS: &[(&str, &str)] = &[
    ("useUnicode", "true"),
    ("characterEncoding", "UTF-8"),
    ("useSSL", "false"),
    ("serverTimezone", "Asia/Shanghai"),
    ("allowPublicKeyRetrieval", "true"),
    ("connectTimeout", "5000"),
];

static CONFIG: OnceCell<Arc<ConnectionConfig>> = OnceCell::new();

/// Returns the process-wide configuration, resolving it on first use.
///
/// Concurrent first callers block until a single resolution finishes. A failed
/// resolution is not cached, but callers are expected to treat it as fatal.
pub fn get() -> Result<Arc<ConnectionConfig>, ConfigError> {
    CONFIG
        .get_or_try_init(|| Resolver::default().resolve().map(Arc::new))
        .map(Arc::clone)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Environment,
    File(PathBuf),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Environment => write!(f, "environment variables"),
            Source::File(path) => write!(f, "configuration file {}", path.display()),
        }
    }
}

/// Resolved connection parameters. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    source: Source,
    driver: String,
    host: String,
    port: String,
    database: String,
    username: String,
    password: String,
    parameters: Vec<(String, String)>,
    url: String,
}

impl ConnectionConfig {
    #[allow(clippy::too_many_arguments)]
    fn new(
        source: Source,
        driver: String,
        host: String,
        port: String,
        database: String,
        username: String,
        password: String,
        parameters: Vec<(String, String)>,
    ) -> Result<ConnectionConfig, ConfigError> {
        let required = [
            ("driver", &driver),
            ("host", &host),
            ("port", &port),
            ("database", &database),
            ("username", &username),
            ("password", &password),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(ConfigError::invalid(format!(
                "`{}` is empty in {}",
                field, source
            )));
        }

        let url = build_url(&host, &port, &database, &parameters);

        Ok(ConnectionConfig {
            source,
            driver,
            host,
            port,
            database,
            username,
            password,
            parameters,
            url,
        })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Query parameters in the order they appear in the URL.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// First value for `key`, if the parameter is set.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("source", &self.source)
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn build_url(host: &str, port: &str, database: &str, parameters: &[(String, String)]) -> String {
    let mut url = format!("{}{}:{}/{}", URL_PREFIX, host, port, database);
    for (i, (key, value)) in parameters.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.push_str(value);
    }
    url
}

type EnvLookup = Box<dyn Fn(&str) -> Option<OsString> + Send + Sync>;

/// Picks between the `DB_*` environment variables and the YAML document.
///
/// The environment wins only when all five variables are set. Anything less
/// falls back to the document entirely; the two sources are never merged.
pub struct Resolver {
    env: EnvLookup,
    path: PathBuf,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(|key: &str| env::var_os(key), CONFIG_FILE_NAME)
    }
}

impl Resolver {
    pub fn new<F, V, P>(env: F, path: P) -> Resolver
    where
        F: Fn(&str) -> Option<V> + Send + Sync + 'static,
        V: Into<OsString>,
        P: Into<PathBuf>,
    {
        Resolver {
            env: Box::new(move |key: &str| -> Option<OsString> { env(key).map(Into::into) }),
            path: path.into(),
        }
    }

    pub fn resolve(&self) -> Result<ConnectionConfig, ConfigError> {
        let config = match self.resolve_env() {
            Some(config) => config?,
            None => self.resolve_file()?,
        };

        log::info!(
            "loaded database config from {}: {}:{}/{}",
            config.source,
            config.host,
            config.port,
            config.database
        );
        Ok(config)
    }

    fn resolve_env(&self) -> Option<Result<ConnectionConfig, ConfigError>> {
        let var = |key: &str| (self.env)(key);
        let (host, port, database, username, password) = match (
            var(DB_HOST),
            var(DB_PORT),
            var(DB_DATABASE),
            var(DB_USERNAME),
            var(DB_PASSWORD),
        ) {
            (Some(host), Some(port), Some(database), Some(username), Some(password)) => {
                (host, port, database, username, password)
            }
            _ => {
                log::debug!("DB_* environment variables incomplete, using {}", self.path.display());
                return None;
            }
        };

        Some(env_config(host, port, database, username, password))
    }

    fn resolve_file(&self) -> Result<ConnectionConfig, ConfigError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ConfigError::Missing {
                    path: self.path.clone(),
                }
            } else {
                ConfigError::Invalid {
                    reason: format!("cannot read {}", self.path.display()),
                    source: Some(Box::new(e)),
                }
            }
        })?;

        let document: Document =
            serde_path_to_error::deserialize(serde_yaml::Deserializer::from_str(&contents))
                .map_err(|e| ConfigError::Invalid {
                    reason: format!("malformed {} at `{}`", self.path.display(), e.path()),
                    source: Some(Box::new(e)),
                })?;

        let section = document.database.ok_or_else(|| {
            ConfigError::invalid(format!(
                "missing `database` section in {}",
                self.path.display()
            ))
        })?;

        let parameters = match section.parameters {
            Some(mapping) => query_parameters(mapping)?,
            None => Vec::new(),
        };

        ConnectionConfig::new(
            Source::File(self.path.clone()),
            section.driver,
            section.host,
            section.port,
            section.database,
            section.username,
            section.password,
            parameters,
        )
    }
}

// A set variable counts as present even when it is not UTF-8; that is an
// error, not a reason to fall back to the file.
fn env_config(
    host: OsString,
    port: OsString,
    database: OsString,
    username: OsString,
    password: OsString,
) -> Result<ConnectionConfig, ConfigError> {
    let utf8 = |key: &str, value: OsString| {
        value
            .into_string()
            .map_err(|_| ConfigError::invalid(format!("`{}` is not valid UTF-8", key)))
    };

    let parameters = ENV_PARAMETERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    ConnectionConfig::new(
        Source::Environment,
        ENV_DRIVER.to_string(),
        utf8(DB_HOST, host)?,
        utf8(DB_PORT, port)?,
        utf8(DB_DATABASE, database)?,
        utf8(DB_USERNAME, username)?,
        utf8(DB_PASSWORD, password)?,
        parameters,
    )
}

#[derive(Deserialize)]
struct Document {
    database: Option<DatabaseSection>,
}

#[derive(Deserialize)]
struct DatabaseSection {
    driver: String,
    host: String,
    #[serde(deserialize_with = "port_string")]
    port: String,
    database: String,
    username: String,
    password: String,
    #[serde(default)]
    parameters: Option<Mapping>,
}

// YAML gives `3306` as a number and `"3306"` as a string; keep both as text.
fn port_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a number or string, found {:?}",
            other
        ))),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        _ => None,
    }
}

fn query_parameters(mapping: Mapping) -> Result<Vec<(String, String)>, ConfigError> {
    mapping
        .iter()
        .map(|(key, value)| {
            let key = scalar_string(key).ok_or_else(|| {
                ConfigError::invalid(format!("parameter key {:?} is not a scalar", key))
            })?;
            let value = scalar_string(value).ok_or_else(|| {
                ConfigError::invalid(format!("parameter `{}` must be a scalar value", key))
            })?;
            Ok((key, value))
        })
        .collect()
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot find {} and DB_* environment variables are not all set", .path.display())]
    Missing { path: PathBuf },
    #[error("invalid database configuration: {reason}")]
    Invalid {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConfigError {
    fn invalid(reason: String) -> ConfigError {
        ConfigError::Invalid {
            reason,
            source: None,
        }
    }
}
