//! Credentials accepted and identities returned by the authenticator.

use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::attributes::{AttributeValue, Metadata};

/// Key holding the authentication methods.
pub const AMR: &str = "amr";
/// Password-based authentication (RFC 8176).
pub const PASSWORD_METHOD: &str = "pwd";

/// Username and password as received.
///
/// Both fields are optional on the wire so that a missing one is reported as
/// a validation error rather than a parsing error.
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
pub struct Credentials {
    #[validate(
        required(message = "Username is required."),
        length(min = 1, message = "Username must not be empty.")
    )]
    pub username: Option<String>,
    #[validate(required(message = "Password is required."))]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub attributes: Metadata,
}

impl Principal {
    /// Identity authenticated by password.
    pub fn from_password(username: impl Into<String>) -> Self {
        let mut attributes = Metadata::new();
        attributes.insert(
            AMR.to_owned(),
            AttributeValue::Multiple(vec![Some(PASSWORD_METHOD.to_owned())]),
        );

        Self {
            username: username.into(),
            attributes,
        }
    }

    /// Merge directory metadata. Directory values replace existing keys.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.attributes.extend(metadata);
        self
    }

    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_credentials() {
        assert!(Credentials::new("tim", "sausages").validate().is_ok());
        assert!(Credentials::new("tim", "").validate().is_ok());
        assert!(Credentials::new("", "sausages").validate().is_err());

        let errors = Credentials::default().validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn test_deserialize_partial_credentials() {
        let credentials: Credentials =
            serde_json::from_str(r#"{"username":"tim"}"#).unwrap();
        assert_eq!(credentials.password, None);
        assert!(credentials.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("tim", "sausages"));
        assert!(!debug.contains("sausages"));
    }

    #[test]
    fn test_principal_json() {
        let mut metadata = Metadata::new();
        metadata.insert("cn".into(), AttributeValue::Single(Some("Tim fox".into())));

        let principal = Principal::from_password("tim").with_metadata(metadata);
        let json = serde_json::to_value(&principal).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "username": "tim",
                "attributes": { "amr": ["pwd"], "cn": "Tim fox" }
            })
        );
    }
}
