//! Credential scopes and `Authorization` header production.
//!
//! The manager holds at most one Basic scope and one NTLM scope, each bound
//! to a URL prefix. Resolution picks the most specific (longest) matching
//! prefix; a URL matching no scope goes out unauthenticated. Reconfiguring a
//! scheme replaces its previous scope, which happens by rebuilding the engine.
//!
//! For NTLM the manager emits the Type 1 negotiation message; the
//! challenge/response continuation is the scheme's standard exchange against
//! the server and is carried by the same header on the retried request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::config::{BasicCredentials, NtlmCredentials};

/// The authentication scheme of a resolved scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Ntlm,
}

/// A credential scope: a URL prefix and the precomputed header it yields.
#[derive(Debug, Clone)]
struct AuthScope {
    scheme: AuthScheme,
    url_prefix: String,
    header_value: String,
}

/// Resolves request URLs to `Authorization` header values.
#[derive(Debug, Default)]
pub(crate) struct AuthManager {
    scopes: Vec<AuthScope>,
}

impl AuthManager {
    /// Builds the manager from configured credential scopes.
    pub(crate) fn from_config(
        basic: Option<&BasicCredentials>,
        ntlm: Option<&NtlmCredentials>,
    ) -> Self {
        let mut scopes = Vec::new();
        if let Some(basic) = basic {
            scopes.push(AuthScope {
                scheme: AuthScheme::Basic,
                url_prefix: basic.url_prefix.clone(),
                header_value: basic_header(&basic.username, &basic.password),
            });
        }
        if let Some(ntlm) = ntlm {
            scopes.push(AuthScope {
                scheme: AuthScheme::Ntlm,
                url_prefix: ntlm.url_prefix.clone(),
                header_value: ntlm_negotiate_header(&ntlm.domain),
            });
        }
        Self { scopes }
    }

    /// Returns the `Authorization` value for the most specific scope whose
    /// prefix matches the URL, or `None` for unauthenticated requests.
    pub(crate) fn resolve(&self, url: &str) -> Option<(AuthScheme, &str)> {
        let scope = self
            .scopes
            .iter()
            .filter(|scope| url.starts_with(&scope.url_prefix))
            .max_by_key(|scope| scope.url_prefix.len())?;
        debug!(prefix = %scope.url_prefix, scheme = ?scope.scheme, "credential scope matched");
        Some((scope.scheme, &scope.header_value))
    }
}

/// `Basic <base64(user:pass)>` per RFC 7617.
fn basic_header(username: &str, password: &str) -> String {
    let token = BASE64.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}

/// `NTLM <base64(type1)>`: the negotiation message opening the handshake.
///
/// The username is not part of the Type 1 message; only the domain (and a
/// workstation name) travel here, as OEM strings in trailing payload buffers.
fn ntlm_negotiate_header(domain: &str) -> String {
    const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
    const MESSAGE_TYPE: u32 = 1;
    // Unicode | OEM | request target | NTLM | domain supplied | workstation supplied
    const FLAGS: u32 = 0x0000_3207;
    const HEADER_LEN: u32 = 32;

    let domain = domain.to_ascii_uppercase().into_bytes();
    let workstation = b"WORKSTATION".to_vec();

    let mut msg = Vec::with_capacity(HEADER_LEN as usize + domain.len() + workstation.len());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&MESSAGE_TYPE.to_le_bytes());
    msg.extend_from_slice(&FLAGS.to_le_bytes());

    // Security buffers: length, allocated length, payload offset.
    let domain_len = u16::try_from(domain.len()).unwrap_or(u16::MAX);
    let domain_offset = HEADER_LEN + u32::try_from(workstation.len()).unwrap_or(0);
    msg.extend_from_slice(&domain_len.to_le_bytes());
    msg.extend_from_slice(&domain_len.to_le_bytes());
    msg.extend_from_slice(&domain_offset.to_le_bytes());

    let ws_len = u16::try_from(workstation.len()).unwrap_or(u16::MAX);
    msg.extend_from_slice(&ws_len.to_le_bytes());
    msg.extend_from_slice(&ws_len.to_le_bytes());
    msg.extend_from_slice(&HEADER_LEN.to_le_bytes());

    msg.extend_from_slice(&workstation);
    msg.extend_from_slice(&domain);

    format!("NTLM {}", BASE64.encode(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(prefix: &str) -> BasicCredentials {
        BasicCredentials {
            url_prefix: prefix.to_string(),
            username: "admin".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn ntlm(prefix: &str) -> NtlmCredentials {
        NtlmCredentials {
            url_prefix: prefix.to_string(),
            domain: "corp".to_string(),
            username: "svc".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn test_basic_header_value() {
        // RFC 7617 example pair.
        assert_eq!(
            basic_header("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn test_ntlm_header_is_type1_negotiate() {
        let header = ntlm_negotiate_header("corp");
        let token = header.strip_prefix("NTLM ").expect("NTLM prefix");
        // base64("NTLMSSP\0\x01...") always opens with this stem.
        assert!(token.starts_with("TlRMTVNTUAAB"), "got {token}");
    }

    #[test]
    fn test_resolve_no_scopes() {
        let manager = AuthManager::from_config(None, None);
        assert!(manager.resolve("http://target.example/").is_none());
    }

    #[test]
    fn test_resolve_prefix_match() {
        let manager = AuthManager::from_config(Some(&basic("http://target.example/admin/")), None);

        assert!(
            manager
                .resolve("http://target.example/admin/users")
                .is_some()
        );
        assert!(manager.resolve("http://target.example/public").is_none());
        assert!(manager.resolve("http://other.example/admin/").is_none());
    }

    #[test]
    fn test_resolve_longest_prefix_wins() {
        let manager = AuthManager::from_config(
            Some(&basic("http://target.example/")),
            Some(&ntlm("http://target.example/intranet/")),
        );

        let (scheme, _) = manager
            .resolve("http://target.example/intranet/page")
            .expect("scope");
        assert_eq!(scheme, AuthScheme::Ntlm);

        let (scheme, _) = manager
            .resolve("http://target.example/other")
            .expect("scope");
        assert_eq!(scheme, AuthScheme::Basic);
    }
}
