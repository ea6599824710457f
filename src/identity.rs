//! Subject identifiers for rate limiting.
//!
//! A request is limited along up to three dimensions, each yielding one
//! [`Identifier`]:
//!
//! | Dimension | Source | Rendered |
//! |-----------|--------|----------|
//! | IP | `X-Forwarded-For` → `X-Real-IP` → peer address | `ip:<addr>` |
//! | User | `Authorization: Bearer <token>` | `user:<sha256(token)[..16]>` |
//! | Endpoint | method + literal path | `endpoint:<METHOD>:<path>` |
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **Client IP extraction trusts client-provided headers.** Deploy behind a
//! reverse proxy that overwrites `X-Forwarded-For` and `X-Real-IP`, and block
//! direct access to the service. Otherwise clients can rotate spoofed IPs to
//! escape per-IP limits, or exhaust the quota of an innocent address.
//!
//! Bearer tokens are hashed, never decoded or verified. Anyone can mint a new
//! user identifier by sending a new token, so the IP dimension should stay on.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::context::RequestView;

/// Fallback IP value when no client IP can be determined.
///
/// All requests without an identifiable IP share this key.
pub const UNKNOWN_IP: &str = "unknown";

/// Hex characters of the token digest kept in a user identifier.
const USER_HASH_LEN: usize = 16;

/// One subject whose request rate is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Ip(String),
    User(String),
    Endpoint { method: String, path: String },
}

impl Identifier {
    /// Dimension name, used as a metrics label.
    pub fn dimension(&self) -> &'static str {
        match self {
            Identifier::Ip(_) => "ip",
            Identifier::User(_) => "user",
            Identifier::Endpoint { .. } => "endpoint",
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Ip(ip) => write!(f, "ip:{ip}"),
            Identifier::User(hash) => write!(f, "user:{hash}"),
            Identifier::Endpoint { method, path } => write!(f, "endpoint:{method}:{path}"),
        }
    }
}

/// Which dimensions are limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityConfig {
    pub by_ip: bool,
    pub by_user: bool,
    pub by_endpoint: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            by_ip: true,
            by_user: true,
            by_endpoint: false,
        }
    }
}

/// Where the client IP came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    FromPeer,
    NotFound,
}

#[inline]
fn extract_ip<R: RequestView + ?Sized>(req: &R) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2"; the first entry is the client.
    // Blank values fall through to the next source.
    if let Some(first_ip) = req
        .header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = req
        .header("x-real-ip")
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ExtractedIp::FromRealIp(real_ip);
    }

    if req.peer_addr().is_some() {
        return ExtractedIp::FromPeer;
    }

    ExtractedIp::NotFound
}

/// Client IP with the proxy-header precedence applied.
pub fn client_ip<R: RequestView + ?Sized>(req: &R) -> String {
    match extract_ip(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => ip.to_string(),
        ExtractedIp::FromPeer => req
            .peer_addr()
            .map_or_else(|| UNKNOWN_IP.to_string(), |ip| ip.to_string()),
        ExtractedIp::NotFound => UNKNOWN_IP.to_string(),
    }
}

/// Hashed bearer token, or `None` when the request carries no usable token.
pub fn user_hash<R: RequestView + ?Sized>(req: &R) -> Option<String> {
    let token = req.header("authorization")?.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }

    let digest = Sha256::digest(token.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(USER_HASH_LEN);
    Some(hash)
}

/// Derive the enabled identifiers for a request, in the order IP, User,
/// Endpoint.
///
/// Pure and deterministic. A dimension whose prerequisite is missing (no
/// bearer token) is omitted.
pub fn resolve<R: RequestView + ?Sized>(req: &R, config: &IdentityConfig) -> Vec<Identifier> {
    let mut identifiers = Vec::with_capacity(3);

    if config.by_ip {
        identifiers.push(Identifier::Ip(client_ip(req)));
    }

    if config.by_user
        && let Some(hash) = user_hash(req)
    {
        identifiers.push(Identifier::User(hash));
    }

    if config.by_endpoint {
        identifiers.push(Identifier::Endpoint {
            method: req.method().as_str().to_string(),
            path: req.path().to_string(),
        });
    }

    identifiers
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use axum::http::{HeaderMap, HeaderValue, Method};
    use std::net::IpAddr;

    fn ctx_with(headers: &[(&'static str, &str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        RequestContext::new(Method::GET, "/api/v1/knowledge").with_headers(map)
    }

    #[test]
    fn test_xff_first_entry_wins() {
        let req = ctx_with(&[
            ("x-forwarded-for", " 203.0.113.9 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&req), "203.0.113.9");
    }

    #[test]
    fn test_blank_proxy_headers_fall_through() {
        let req = ctx_with(&[("x-forwarded-for", ""), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&req), "198.51.100.2");

        let req = ctx_with(&[("x-forwarded-for", " , 10.0.0.1"), ("x-real-ip", "  ")])
            .with_peer_addr(IpAddr::from([10, 0, 0, 9]));
        assert_eq!(client_ip(&req), "10.0.0.9");

        assert_eq!(client_ip(&ctx_with(&[("x-real-ip", "")])), UNKNOWN_IP);
    }

    #[test]
    fn test_real_ip_then_peer_then_unknown() {
        let req = ctx_with(&[("x-real-ip", " 198.51.100.2 ")]);
        assert_eq!(client_ip(&req), "198.51.100.2");

        let req = ctx_with(&[]).with_peer_addr(IpAddr::from([127, 0, 0, 1]));
        assert_eq!(client_ip(&req), "127.0.0.1");

        assert_eq!(client_ip(&ctx_with(&[])), UNKNOWN_IP);
    }

    #[test]
    fn test_user_hash_is_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        let req = ctx_with(&[("authorization", "Bearer abc")]);
        assert_eq!(user_hash(&req).as_deref(), Some("ba7816bf8f01cfea"));
    }

    #[test]
    fn test_non_bearer_or_empty_token_has_no_user() {
        assert!(user_hash(&ctx_with(&[("authorization", "Basic dXNlcjpwdw==")])).is_none());
        assert!(user_hash(&ctx_with(&[("authorization", "bearer abc")])).is_none());
        assert!(user_hash(&ctx_with(&[("authorization", "Bearer ")])).is_none());
        assert!(user_hash(&ctx_with(&[])).is_none());
    }

    #[test]
    fn test_resolve_order_and_rendering() {
        let req = ctx_with(&[
            ("x-forwarded-for", "203.0.113.9"),
            ("authorization", "Bearer abc"),
        ]);
        let config = IdentityConfig {
            by_ip: true,
            by_user: true,
            by_endpoint: true,
        };

        let rendered: Vec<String> = resolve(&req, &config)
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            rendered,
            vec![
                "ip:203.0.113.9",
                "user:ba7816bf8f01cfea",
                "endpoint:GET:/api/v1/knowledge",
            ]
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let req = ctx_with(&[("authorization", "Bearer token-123")]);
        let config = IdentityConfig::default();
        assert_eq!(resolve(&req, &config), resolve(&req, &config));
    }

    #[test]
    fn test_disabled_dimensions_are_omitted() {
        let req = ctx_with(&[("authorization", "Bearer abc")]);
        let config = IdentityConfig {
            by_ip: false,
            by_user: false,
            by_endpoint: false,
        };
        assert!(resolve(&req, &config).is_empty());

        let ip_only = IdentityConfig {
            by_user: false,
            ..IdentityConfig::default()
        };
        let ids = resolve(&req, &ip_only);
        assert_eq!(ids, vec![Identifier::Ip(UNKNOWN_IP.to_string())]);
        assert_eq!(ids[0].dimension(), "ip");
    }
}
