//! [`Directory`] backed by the synchronous `ldap3` client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ldap3::{LdapConn, LdapConnSettings, LdapResult, Scope, SearchEntry};
use url::Url;

use crate::config::SIMPLE_AUTHENTICATION_MECHANISM;

use super::{
    ConnectionParameters, Directory, DirectoryAttribute, DirectoryEntry,
    DirectoryError, DirectorySession, ReferralPolicy, SearchControls,
};

/// `referral` result code.
const REFERRAL: u32 = 10;
const MAX_REFERRAL_HOPS: usize = 10;
const DEFAULT_PORT: u16 = 389;

pub(super) const ALL_USER_ATTRIBUTES: &str = "*";
pub(super) const NO_ATTRIBUTES: &str = "1.1";

/// Connects to `ldap://` servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapDirectory;

impl LdapDirectory {
    fn open_with_hops(
        &self,
        parameters: &ConnectionParameters,
        hops: usize,
    ) -> Result<LdapSession, DirectoryError> {
        if hops > MAX_REFERRAL_HOPS {
            return Err(DirectoryError::TooManyReferrals);
        }

        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = parameters.connect_timeout {
            settings = settings.set_conn_timeout(timeout);
        }

        let mut conn = LdapConn::with_settings(settings, &parameters.url)?;

        match bind(&mut conn, parameters) {
            Ok(result) if result.rc == REFERRAL => {
                let _ = conn.unbind();

                match parameters.referral {
                    ReferralPolicy::Follow => {
                        let url = referral_target(&result.refs)?;
                        tracing::debug!(%url, "following bind referral");
                        self.open_with_hops(&parameters.with_url(url), hops + 1)
                    },
                    _ => Err(DirectoryError::Referral(result.refs)),
                }
            },
            Ok(result) => {
                if let Err(err) = result.success() {
                    let _ = conn.unbind();
                    return Err(err.into());
                }

                Ok(LdapSession::new(conn, parameters.clone(), hops))
            },
            Err(err) => {
                let _ = conn.unbind();
                Err(err)
            },
        }
    }
}

impl Directory for LdapDirectory {
    type Session = LdapSession;

    fn open(
        &self,
        parameters: &ConnectionParameters,
    ) -> Result<LdapSession, DirectoryError> {
        self.open_with_hops(parameters, 0)
    }
}

/// Simple bind with the principal and password. Sessions are never left
/// unauthenticated.
fn bind(
    conn: &mut LdapConn,
    parameters: &ConnectionParameters,
) -> Result<LdapResult, DirectoryError> {
    let Some(mechanism) = &parameters.mechanism else {
        return Err(DirectoryError::UnauthenticatedBind);
    };
    if !mechanism.eq_ignore_ascii_case(SIMPLE_AUTHENTICATION_MECHANISM) {
        return Err(DirectoryError::UnsupportedMechanism(mechanism.clone()));
    }

    let dn = parameters.principal.as_deref().unwrap_or_default();
    let password = parameters.credentials.as_deref().unwrap_or_default();

    // An empty password turns a simple bind into an unauthenticated one,
    // which most servers accept.
    if password.is_empty() {
        return Err(DirectoryError::UnauthenticatedBind);
    }

    Ok(conn.simple_bind(dn, password)?)
}

/// `scheme://host:port` of the first usable referral.
fn referral_target(refs: &[String]) -> Result<String, DirectoryError> {
    refs.iter()
        .filter_map(|r| Url::parse(r).ok())
        .find_map(|url| {
            let host = url.host_str()?;
            let port = url.port().unwrap_or(DEFAULT_PORT);
            Some(format!("{}://{}:{}", url.scheme(), host, port))
        })
        .ok_or_else(|| DirectoryError::Referral(refs.to_vec()))
}

/// Bound `ldap3` connection.
pub struct LdapSession {
    conn: LdapConn,
    parameters: ConnectionParameters,
    hops: usize,
    closed: bool,
}

impl LdapSession {
    fn new(conn: LdapConn, parameters: ConnectionParameters, hops: usize) -> Self {
        Self {
            conn,
            parameters,
            hops,
            closed: false,
        }
    }

    fn follow(
        &self,
        refs: Vec<String>,
        base: &str,
        filter: &str,
        controls: &SearchControls,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let url = referral_target(&refs)?;
        tracing::debug!(%url, "following search referral");

        let session = LdapDirectory
            .open_with_hops(&self.parameters.with_url(url), self.hops + 1)?;
        let mut session = super::SessionGuard::new(session);
        let entries = session.search(base, filter, controls)?;
        session.close()?;

        Ok(entries)
    }
}

impl DirectorySession for LdapSession {
    fn search(
        &mut self,
        base: &str,
        filter: &str,
        controls: &SearchControls,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if self.closed {
            return Err(DirectoryError::Closed);
        }

        let ldap3::SearchResult(entries, result) =
            self.conn
                .search(base, Scope::Subtree, filter, controls.attributes())?;

        if result.rc == REFERRAL {
            return match self.parameters.referral {
                ReferralPolicy::Follow => {
                    self.follow(result.refs, base, filter, controls)
                },
                ReferralPolicy::Ignore => Ok(Vec::new()),
                ReferralPolicy::Throw => {
                    Err(DirectoryError::Referral(result.refs))
                },
            };
        }
        result.success()?;

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
            .map(|entry| into_entry(SearchEntry::construct(entry)))
            .collect())
    }

    fn close(&mut self) -> Result<(), DirectoryError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.conn.unbind()?;
        Ok(())
    }
}

/// Text values are kept as-is, binary ones are base64 encoded.
fn into_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut attributes: Vec<DirectoryAttribute> = entry
        .attrs
        .into_iter()
        .map(|(id, values)| DirectoryAttribute::new(id, values))
        .chain(entry.bin_attrs.into_iter().map(|(id, values)| {
            DirectoryAttribute::new(
                id,
                values.iter().map(|value| STANDARD.encode(value)),
            )
        }))
        .collect();
    attributes.sort_by(|a, b| a.id.cmp(&b.id));

    DirectoryEntry {
        dn: entry.dn,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_password_less_mechanisms_are_refused() {
        // Accepts TCP connections but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ldap://{}", listener.local_addr().unwrap());

        for mechanism in ["none", "EXTERNAL", "DIGEST-MD5"] {
            let parameters = ConnectionParameters {
                url: url.clone(),
                principal: Some("uid=anyone,ou=Users,dc=myorg,dc=com".into()),
                credentials: Some("definitely-wrong".into()),
                mechanism: Some(mechanism.into()),
                referral: ReferralPolicy::Follow,
                connect_timeout: Some(std::time::Duration::from_secs(1)),
            };

            assert!(matches!(
                LdapDirectory.open(&parameters),
                Err(DirectoryError::UnsupportedMechanism(_))
            ));
        }

        let parameters = ConnectionParameters {
            url,
            principal: None,
            credentials: None,
            mechanism: None,
            referral: ReferralPolicy::Follow,
            connect_timeout: Some(std::time::Duration::from_secs(1)),
        };
        assert!(matches!(
            LdapDirectory.open(&parameters),
            Err(DirectoryError::UnauthenticatedBind)
        ));
    }

    #[test]
    fn test_referral_target() {
        let refs = vec![
            "not a url".to_owned(),
            "ldap://other.myorg.com/dc=myorg,dc=com".to_owned(),
        ];
        assert_eq!(
            referral_target(&refs).unwrap(),
            "ldap://other.myorg.com:389"
        );

        let refs = vec!["ldap://replica:10389".to_owned()];
        assert_eq!(referral_target(&refs).unwrap(), "ldap://replica:10389");

        assert!(matches!(
            referral_target(&[]),
            Err(DirectoryError::Referral(_))
        ));
    }

    #[test]
    fn test_into_entry() {
        let entry = SearchEntry {
            dn: "uid=tim,ou=Users,dc=myorg,dc=com".into(),
            attrs: HashMap::from([
                ("sn".to_owned(), vec!["Ldap".to_owned()]),
                (
                    "objectclass".to_owned(),
                    vec!["top".to_owned(), "person".to_owned()],
                ),
            ]),
            bin_attrs: HashMap::from([(
                "jpegPhoto".to_owned(),
                vec![vec![0xff, 0xd8, 0xff]],
            )]),
        };

        let entry = into_entry(entry);
        assert_eq!(entry.dn, "uid=tim,ou=Users,dc=myorg,dc=com");
        assert_eq!(
            entry.attributes,
            vec![
                DirectoryAttribute::new("jpegPhoto", ["/9j/"]),
                DirectoryAttribute::new("objectclass", ["top", "person"]),
                DirectoryAttribute::new("sn", ["Ldap"]),
            ]
        );
    }

    #[test]
    fn test_unreachable_server() {
        let parameters = ConnectionParameters {
            url: "ldap://127.0.0.1:1".into(),
            principal: Some("uid=tim,ou=Users,dc=myorg,dc=com".into()),
            credentials: Some("sausages".into()),
            mechanism: Some("simple".into()),
            referral: ReferralPolicy::Follow,
            connect_timeout: Some(std::time::Duration::from_secs(1)),
        };

        assert!(LdapDirectory.open(&parameters).is_err());
    }
}
