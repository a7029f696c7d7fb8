//! Username substitution into configured DN and filter templates.
//!
//! The username is inserted verbatim: LDAP special characters (`*`, `(`, `)`,
//! `\`, NUL) are NOT escaped.

/// Placeholder replaced by the username.
pub const PLACEHOLDER: &str = "{0}";

/// Template containing the [`PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate(String);

impl QueryTemplate {
    /// Create a new [`QueryTemplate`].
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Replace every placeholder occurrence with `username`.
    pub fn substitute(&self, username: &str) -> String {
        self.0.replace(PLACEHOLDER, username)
    }
}

impl From<&str> for QueryTemplate {
    fn from(template: &str) -> Self {
        Self::new(template)
    }
}

impl AsRef<str> for QueryTemplate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
