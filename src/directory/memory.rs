//! In-memory [`Directory`] used by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ldap3::{LdapError, LdapResult};

use crate::config::SIMPLE_AUTHENTICATION_MECHANISM;

use super::{
    ConnectionParameters, Directory, DirectoryAttribute, DirectoryEntry,
    DirectoryError, DirectorySession, SearchControls,
};

const INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Clone)]
struct Record {
    dn: String,
    password: Option<String>,
    attributes: Vec<DirectoryAttribute>,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    searches: AtomicUsize,
    last_search: Mutex<Option<(String, String, SearchControls)>>,
}

/// Entries kept in insertion order; search filters are a single
/// `attr=value` assertion.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    records: Arc<Vec<Record>>,
    counters: Arc<Counters>,
}

impl MemoryDirectory {
    /// `uid=tim,ou=Users,dc=myorg,dc=com` with password `sausages`.
    pub fn myorg() -> Self {
        Self::default().with_entry(
            "uid=tim,ou=Users,dc=myorg,dc=com",
            Some("sausages"),
            vec![
                DirectoryAttribute::new("cn", ["Tim fox"]),
                DirectoryAttribute::new("sn", ["Ldap"]),
                DirectoryAttribute::new("uid", ["tim"]),
                DirectoryAttribute::new(
                    "objectclass",
                    ["top", "inetOrgPerson", "person", "organizationalPerson"],
                ),
                DirectoryAttribute::new("userpassword", ["sausages"]),
            ],
        )
    }

    pub fn with_entry(
        self,
        dn: &str,
        password: Option<&str>,
        attributes: Vec<DirectoryAttribute>,
    ) -> Self {
        let mut records = self.records.as_ref().clone();
        records.push(Record {
            dn: dn.to_owned(),
            password: password.map(ToOwned::to_owned),
            attributes,
        });

        Self {
            records: Arc::new(records),
            counters: self.counters,
        }
    }

    /// Connection attempts.
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.counters.searches.load(Ordering::SeqCst)
    }

    /// Base and filter of the last search.
    pub fn last_search(&self) -> Option<(String, String)> {
        self.counters
            .last_search
            .lock()
            .ok()?
            .as_ref()
            .map(|(base, filter, _)| (base.clone(), filter.clone()))
    }

    pub fn last_controls(&self) -> Option<SearchControls> {
        self.counters
            .last_search
            .lock()
            .ok()?
            .as_ref()
            .map(|(_, _, controls)| controls.clone())
    }
}

fn rejected(rc: u32, text: &str) -> DirectoryError {
    let result = LdapResult {
        rc,
        matched: String::new(),
        text: text.to_owned(),
        refs: Vec::new(),
        ctrls: Vec::new(),
    };

    match result.success() {
        Ok(_) => DirectoryError::Closed,
        Err(err) => err.into(),
    }
}

impl Directory for MemoryDirectory {
    type Session = MemorySession;

    fn open(
        &self,
        parameters: &ConnectionParameters,
    ) -> Result<MemorySession, DirectoryError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        let Some(mechanism) = &parameters.mechanism else {
            return Err(DirectoryError::UnauthenticatedBind);
        };
        if !mechanism.eq_ignore_ascii_case(SIMPLE_AUTHENTICATION_MECHANISM) {
            return Err(DirectoryError::UnsupportedMechanism(mechanism.clone()));
        }

        let password = parameters.credentials.as_deref().unwrap_or_default();
        if password.is_empty() {
            return Err(DirectoryError::UnauthenticatedBind);
        }

        let dn = parameters.principal.as_deref().unwrap_or_default();
        let bound = self.records.iter().any(|record| {
            record.dn.eq_ignore_ascii_case(dn)
                && record.password.as_deref() == Some(password)
        });
        if !bound {
            return Err(rejected(INVALID_CREDENTIALS, "invalid credentials"));
        }

        Ok(MemorySession {
            directory: self.clone(),
            closed: false,
        })
    }
}

pub struct MemorySession {
    directory: MemoryDirectory,
    closed: bool,
}

impl DirectorySession for MemorySession {
    fn search(
        &mut self,
        base: &str,
        filter: &str,
        controls: &SearchControls,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if self.closed {
            return Err(DirectoryError::Closed);
        }

        let counters = &self.directory.counters;
        counters.searches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = counters.last_search.lock() {
            *last = Some((base.to_owned(), filter.to_owned(), controls.clone()));
        }

        let (attribute, value) = filter
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_once('=')
            .ok_or(LdapError::FilterParsing)?;

        let base = base.to_ascii_lowercase();
        Ok(self
            .directory
            .records
            .iter()
            .filter(|record| record.dn.to_ascii_lowercase().ends_with(&base))
            .filter(|record| {
                record.attributes.iter().any(|a| {
                    a.id.eq_ignore_ascii_case(attribute)
                        && (value == "*"
                            || a.values.iter().any(|v| v.as_deref() == Some(value)))
                })
            })
            .map(|record| DirectoryEntry {
                dn: record.dn.clone(),
                attributes: record
                    .attributes
                    .iter()
                    .filter(|a| controls.allows(&a.id))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    fn close(&mut self) -> Result<(), DirectoryError> {
        if !self.closed {
            self.closed = true;
            self.directory.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
