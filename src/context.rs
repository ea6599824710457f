//! Read-only view of an inbound request.
//!
//! The identity resolver and the validation gate only ever look at a request
//! through [`RequestView`], so they work the same for an axum request, a test
//! fixture, or a fuzz input. [`RequestContext`] is the owned implementation the
//! admission layer builds from `http::request::Parts`.

use std::net::{IpAddr, SocketAddr};

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};

/// Capabilities the admission layer needs from a request.
pub trait RequestView {
    fn method(&self) -> &Method;

    /// Path without the query string.
    fn path(&self) -> &str;

    fn headers(&self) -> &HeaderMap;

    /// Raw (still percent-encoded) query string, without the leading `?`.
    fn query(&self) -> Option<&str>;

    /// Matched route parameters in declaration order.
    fn path_params(&self) -> &[(String, String)];

    /// Buffered body. Empty when the body was not read.
    fn body(&self) -> &[u8];

    /// Address of the directly connected peer, if known.
    fn peer_addr(&self) -> Option<IpAddr>;

    /// Header value as text, if present and valid visible ASCII.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

/// Owned per-request record.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Option<String>,
    path_params: Vec<(String, String)>,
    body: Bytes,
    peer_addr: Option<IpAddr>,
}

impl RequestContext {
    /// Build a context from request parts.
    ///
    /// The peer address comes from axum's `ConnectInfo<SocketAddr>` extension,
    /// which is only present when the server was started with
    /// `into_make_service_with_connect_info`.
    pub fn from_parts(parts: &Parts, path_params: Vec<(String, String)>, body: Bytes) -> Self {
        let peer_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            query: parts.uri.query().map(str::to_string),
            path_params,
            body,
            peer_addr,
        }
    }

    /// Minimal context for a method and a path-and-query, with no headers.
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };

        Self {
            method,
            path,
            headers: HeaderMap::new(),
            query,
            path_params: Vec::new(),
            body: Bytes::new(),
            peer_addr: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_path_params(mut self, params: Vec<(String, String)>) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Hand the buffered body back so the request can be rebuilt.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl RequestView for RequestContext {
    fn method(&self) -> &Method {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn path_params(&self) -> &[(String, String)] {
        &self.path_params
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn peer_addr(&self) -> Option<IpAddr> {
        self.peer_addr
    }
}
