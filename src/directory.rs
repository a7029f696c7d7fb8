//! Directory session: one connection per authentication attempt.

mod client;
#[cfg(test)]
pub(crate) mod memory;

pub use client::{LdapDirectory, LdapSession};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{
    FOLLOW_REFERRAL, LdapOptions, SIMPLE_AUTHENTICATION_MECHANISM,
};

/// Errors raised by a directory. They never reach the caller as-is: the
/// authenticator collapses all of them into one authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Ldap(#[from] ldap3::LdapError),
    #[error("unsupported authentication mechanism `{0}`")]
    UnsupportedMechanism(String),
    #[error("refusing unauthenticated simple bind")]
    UnauthenticatedBind,
    #[error("directory returned a referral to {0:?}")]
    Referral(Vec<String>),
    #[error("referral limit reached")]
    TooManyReferrals,
    #[error("session is closed")]
    Closed,
}

/// How referral results are handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReferralPolicy {
    /// Chase the first referred server.
    #[default]
    Follow,
    /// Treat a referred search as returning nothing.
    Ignore,
    /// Fail the operation.
    Throw,
}

impl FromStr for ReferralPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            FOLLOW_REFERRAL => Ok(Self::Follow),
            "ignore" => Ok(Self::Ignore),
            "throw" => Ok(Self::Throw),
            _ => Err(s.to_owned()),
        }
    }
}

/// Everything needed to open and bind a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub url: String,
    pub principal: Option<String>,
    pub credentials: Option<String>,
    pub mechanism: Option<String>,
    pub referral: ReferralPolicy,
    pub connect_timeout: Option<Duration>,
}

impl ConnectionParameters {
    /// Compose parameters from options and an optional principal/password.
    pub fn compose(
        options: &LdapOptions,
        principal: Option<&str>,
        credentials: Option<&str>,
    ) -> Self {
        let mechanism = match &options.authentication_mechanism {
            Some(mechanism) => Some(mechanism.clone()),
            None if principal.is_some() || credentials.is_some() => {
                Some(SIMPLE_AUTHENTICATION_MECHANISM.to_owned())
            },
            None => None,
        };

        let referral = options
            .referral
            .as_deref()
            .unwrap_or(FOLLOW_REFERRAL)
            .parse()
            .unwrap_or_default();

        Self {
            url: options.url.clone(),
            principal: principal.map(ToOwned::to_owned),
            credentials: credentials.map(ToOwned::to_owned),
            mechanism,
            referral,
            connect_timeout: options.connect_timeout(),
        }
    }

    /// Same parameters against another server.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("url", &self.url)
            .field("principal", &self.principal)
            .field("credentials", &self.credentials.as_ref().map(|_| "***"))
            .field("mechanism", &self.mechanism)
            .field("referral", &self.referral)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Search options. The scope is always the whole subtree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchControls {
    /// `None` returns every user attribute.
    pub returning_attributes: Option<Vec<String>>,
}

impl SearchControls {
    pub fn new(returning_attributes: Option<Vec<String>>) -> Self {
        Self {
            returning_attributes,
        }
    }

    /// Attribute list to send on the wire.
    pub fn attributes(&self) -> Vec<String> {
        match &self.returning_attributes {
            None => vec![client::ALL_USER_ATTRIBUTES.to_owned()],
            Some(list) if list.is_empty() => {
                vec![client::NO_ATTRIBUTES.to_owned()]
            },
            Some(list) => list.clone(),
        }
    }

    /// Whether `id` was requested.
    pub fn allows(&self, id: &str) -> bool {
        self.returning_attributes.as_ref().is_none_or(|list| {
            list.iter().any(|allowed| {
                allowed == client::ALL_USER_ATTRIBUTES
                    || allowed == "+"
                    || allowed.eq_ignore_ascii_case(id)
            })
        })
    }
}

/// One directory attribute with its values in returned order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryAttribute {
    pub id: String,
    pub values: Vec<Option<String>>,
}

impl DirectoryAttribute {
    pub fn new<I, V>(id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            values: values.into_iter().map(|v| Some(v.into())).collect(),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: Vec<DirectoryAttribute>,
}

/// Connector to a directory server.
///
/// Calls are blocking and run on the blocking pool.
pub trait Directory: Send + Sync + 'static {
    type Session: DirectorySession;

    /// Connect and bind with `parameters`.
    fn open(
        &self,
        parameters: &ConnectionParameters,
    ) -> Result<Self::Session, DirectoryError>;
}

/// A bound connection.
pub trait DirectorySession {
    /// Subtree search rooted at `base`.
    fn search(
        &mut self,
        base: &str,
        filter: &str,
        controls: &SearchControls,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Release the connection.
    fn close(&mut self) -> Result<(), DirectoryError>;
}

/// Closes the wrapped session when dropped if [`SessionGuard::close`] was
/// never reached.
pub struct SessionGuard<S: DirectorySession> {
    session: Option<S>,
}

impl<S: DirectorySession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn search(
        &mut self,
        base: &str,
        filter: &str,
        controls: &SearchControls,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.session
            .as_mut()
            .ok_or(DirectoryError::Closed)?
            .search(base, filter, controls)
    }

    pub fn close(mut self) -> Result<(), DirectoryError> {
        match self.session.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        }
    }
}

impl<S: DirectorySession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close() {
                tracing::debug!(error = %err, "directory session not closed cleanly");
            }
        }
    }
}
