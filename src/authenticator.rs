//! LDAP authentication provider.
//!
//! Validate credentials, bind as the user, optionally look up the user's
//! attributes, then close the connection. Directory calls are blocking and
//! run on tokio's blocking pool.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use validator::Validate;

use crate::attributes::{self, Metadata};
use crate::config::{ConfigError, DEFAULT_MAX_CONCURRENCY, LdapOptions};
use crate::directory::{
    ConnectionParameters, Directory, DirectoryError, LdapDirectory,
    SearchControls, SessionGuard,
};
use crate::error::{Result, ServerError};
use crate::principal::{Credentials, Principal};
use crate::query::QueryTemplate;

/// Authenticates username/password pairs against a directory.
pub struct LdapAuthenticator<D: Directory = LdapDirectory> {
    options: Arc<LdapOptions>,
    bind_query: QueryTemplate,
    filter_query: Option<QueryTemplate>,
    controls: SearchControls,
    directory: Arc<D>,
    permits: Arc<Semaphore>,
}

impl<D: Directory> Clone for LdapAuthenticator<D> {
    fn clone(&self) -> Self {
        Self {
            options: Arc::clone(&self.options),
            bind_query: self.bind_query.clone(),
            filter_query: self.filter_query.clone(),
            controls: self.controls.clone(),
            directory: Arc::clone(&self.directory),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl LdapAuthenticator {
    /// Create a new [`LdapAuthenticator`] using `ldap3`.
    pub fn new(options: LdapOptions) -> Result<Self> {
        Self::with_directory(options, LdapDirectory)
    }
}

impl<D: Directory> LdapAuthenticator<D> {
    /// Create a new [`LdapAuthenticator`] on top of any [`Directory`].
    pub fn with_directory(options: LdapOptions, directory: D) -> Result<Self> {
        options.validate()?;

        let bind_query = options
            .authentication_query
            .as_deref()
            .map(QueryTemplate::from)
            .ok_or(ConfigError::MissingAuthenticationQuery)?;
        let filter_query = options.filter_query.as_deref().map(QueryTemplate::from);
        let controls = SearchControls::new(options.returning_attributes.clone());

        Ok(Self {
            options: Arc::new(options),
            bind_query,
            filter_query,
            controls,
            directory: Arc::new(directory),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
        })
    }

    /// Limit directory round-trips running at once.
    pub fn max_concurrency(mut self, permits: usize) -> Result<Self> {
        if permits == 0 {
            return Err(ConfigError::Concurrency.into());
        }

        self.permits = Arc::new(Semaphore::new(permits));
        Ok(self)
    }

    /// Options in use.
    pub fn options(&self) -> &LdapOptions {
        &self.options
    }

    /// Authenticate a `{ "username": ..., "password": ... }` object.
    pub async fn authenticate_json(
        &self,
        credentials: serde_json::Value,
    ) -> Result<Principal> {
        let credentials: Credentials = serde_json::from_value(credentials)
            .map_err(|err| ServerError::ParsingForm(Box::new(err)))?;

        self.authenticate(credentials).await
    }

    /// Authenticate `credentials`.
    ///
    /// Every directory failure is reported as [`ServerError::Unauthorized`].
    #[tracing::instrument(skip_all, fields(username = credentials.username.as_deref()))]
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Principal> {
        let start = Instant::now();
        let result = self.try_authenticate(credentials).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(ServerError::Unauthorized) => "failure",
            Err(_) => "invalid",
        };
        metrics::counter!("ldap_authentications_total", "outcome" => outcome)
            .increment(1);
        metrics::histogram!("ldap_authentication_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn try_authenticate(&self, credentials: Credentials) -> Result<Principal> {
        credentials.validate()?;
        let (Some(username), Some(password)) =
            (credentials.username, credentials.password)
        else {
            return Err(ServerError::Unauthorized);
        };

        let principal = self.bind_query.substitute(&username);
        let filter = self.filter_query.as_ref().map(|q| q.substitute(&username));
        let parameters = ConnectionParameters::compose(
            &self.options,
            Some(&principal),
            Some(&password),
        );

        // The semaphore is never closed, so acquiring cannot fail.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Unauthorized)?;

        let directory = Arc::clone(&self.directory);
        let controls = self.controls.clone();
        let span = tracing::Span::current();

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            span.in_scope(|| {
                lookup(
                    directory.as_ref(),
                    &parameters,
                    &principal,
                    filter.as_deref(),
                    &controls,
                )
            })
        });

        match task.await {
            Ok(Ok(metadata)) => {
                Ok(Principal::from_password(username).with_metadata(metadata))
            },
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "directory authentication failed");
                Err(ServerError::Unauthorized)
            },
            Err(err) => {
                tracing::debug!(error = %err, "directory task did not complete");
                Err(ServerError::Unauthorized)
            },
        }
    }
}

/// Bind, search if a filter is set, then close.
fn lookup<D: Directory>(
    directory: &D,
    parameters: &ConnectionParameters,
    base: &str,
    filter: Option<&str>,
    controls: &SearchControls,
) -> std::result::Result<Metadata, DirectoryError> {
    let mut session = SessionGuard::new(directory.open(parameters)?);

    let metadata = match filter {
        Some(filter) => {
            attributes::collect(session.search(base, filter, controls)?, controls)
        },
        None => Metadata::new(),
    };

    session.close()?;
    Ok(metadata)
}
