//! Configuration manager for autha-ldap.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::directory::{Directory, ReferralPolicy};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8888";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const LDAP_SCHEME: &str = "ldap";

/// Default bind mechanism when a principal/credential pair is present.
pub const SIMPLE_AUTHENTICATION_MECHANISM: &str = "simple";
/// Default referral handling.
pub const FOLLOW_REFERRAL: &str = "follow";
/// Default number of concurrent directory round-trips.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Errors raised while checking the LDAP options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("directory url is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("directory url must use the `ldap` scheme, got `{0}`")]
    Scheme(String),
    #[error("directory url must specify a port")]
    MissingPort,
    #[error("`authenticationQuery` is required")]
    MissingAuthenticationQuery,
    #[error("`authenticationQuery` must contain the `{{0}}` placeholder")]
    MissingPlaceholder,
    #[error("`authenticationMechanism` must be `simple`, got `{0}`")]
    Mechanism(String),
    #[error("unknown referral policy `{0}`")]
    Referral(String),
    #[error("`maxConcurrency` must be greater than zero")]
    Concurrency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listen address of the HTTP server.
    pub address: String,
    /// Upper bound of directory round-trips running at once.
    pub max_concurrency: usize,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to the directory.
    #[serde(skip_serializing)]
    pub ldap: LdapOptions,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_CRATE_NAME").into(),
            address: DEFAULT_ADDRESS.into(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            version: String::default(),
            path: PathBuf::default(),
            ldap: LdapOptions::default(),
        }
    }
}

/// LDAP authentication options.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LdapOptions {
    /// `ldap://host:port` of the directory.
    pub url: String,
    /// Bind mechanism. Only `simple` is accepted; `simple` if not set.
    pub authentication_mechanism: Option<String>,
    /// Referral handling. `follow` if not set.
    pub referral: Option<String>,
    /// Bind DN template, e.g. `uid={0},ou=users,dc=foo,dc=com`.
    pub authentication_query: Option<String>,
    /// Filter used to look up metadata about the authenticated user.
    pub filter_query: Option<String>,
    /// Attributes returned by the filter query. Every attribute if not set.
    pub returning_attributes: Option<Vec<String>>,
    /// Seconds to wait for the TCP connection.
    pub connect_timeout: Option<u64>,
}

impl LdapOptions {
    /// Create options for `url` and bind DN template.
    pub fn new(
        url: impl Into<String>,
        authentication_query: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            authentication_query: Some(authentication_query.into()),
            ..Default::default()
        }
    }

    /// Set the bind mechanism.
    pub fn with_authentication_mechanism(
        mut self,
        mechanism: impl Into<String>,
    ) -> Self {
        self.authentication_mechanism = Some(mechanism.into());
        self
    }

    /// Set the referral policy.
    pub fn with_referral(mut self, referral: impl Into<String>) -> Self {
        self.referral = Some(referral.into());
        self
    }

    /// Set the metadata filter template.
    pub fn with_filter_query(mut self, filter: impl Into<String>) -> Self {
        self.filter_query = Some(filter.into());
        self
    }

    /// Restrict attributes returned by the metadata search.
    pub fn with_returning_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning_attributes =
            Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Connection timeout, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// Check options before any authentication is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != LDAP_SCHEME {
            return Err(ConfigError::Scheme(url.scheme().to_owned()));
        }
        if url.port().is_none() {
            return Err(ConfigError::MissingPort);
        }

        let Some(query) = &self.authentication_query else {
            return Err(ConfigError::MissingAuthenticationQuery);
        };
        if !query.contains(crate::query::PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder);
        }

        // Only a simple bind checks the supplied password.
        if let Some(mechanism) = &self.authentication_mechanism {
            if !mechanism.eq_ignore_ascii_case(SIMPLE_AUTHENTICATION_MECHANISM) {
                return Err(ConfigError::Mechanism(mechanism.clone()));
            }
        }

        if let Some(referral) = &self.referral {
            referral
                .parse::<ReferralPolicy>()
                .map_err(|_| ConfigError::Referral(referral.clone()))?;
        }

        Ok(())
    }
}

impl<D: Directory> FromRef<AppState<D>> for Arc<Configuration> {
    fn from_ref(state: &AppState<D>) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => return Arc::new(self.error(err)),
                    };

                config.version = VERSION.to_owned();
                config.path = file_path.clone();

                Arc::new(config)
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` cannot be read");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}
