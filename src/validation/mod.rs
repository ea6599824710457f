//! Input validation gate.
//!
//! Runs after rate limiting, before the handler. Checks, in order:
//!
//! 1. Headers: total size, then unsafe substrings per value
//! 2. Query: raw length, then injection patterns on the raw and decoded forms
//! 3. Path parameters: UUID and slug shape, injection patterns otherwise
//! 4. Body (POST/PUT/PATCH, JSON or form content): size, JSON syntax, nesting
//!    depth, object keys
//!
//! # Strict vs. Lenient
//!
//! | Check | Strict | Lenient |
//! |-------|--------|---------|
//! | Size ceilings | reject | reject |
//! | UUID / slug shape | reject | reject |
//! | Unparseable JSON, too deep | reject | reject |
//! | Header / query / path injection | reject | log |
//! | JSON object keys | reject | log |
//! | JSON string values | log | log |
//!
//! String values inside JSON bodies are never rejected. Free text such as an
//! article body routinely contains quotes and SQL keywords.

pub mod patterns;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use serde_json::Value;
use tracing::warn;

use crate::context::RequestView;
use crate::error::{GateError, PathParamKind};
use crate::metrics;

pub use patterns::{Category, ValidationPattern};

/// Headers added to every response that passed the gate.
pub const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Insert [`SECURITY_HEADERS`], replacing any value the handler set.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
}

/// Longest excerpt of a suspicious value written to logs.
const PREVIEW_CHARS: usize = 100;

fn preview(value: &str) -> String {
    value.chars().take(PREVIEW_CHARS).collect()
}

/// Gate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Reject injection findings instead of only logging them.
    pub strict_mode: bool,
    pub max_header_bytes: usize,
    pub max_query_bytes: usize,
    pub max_body_bytes: usize,
    pub max_json_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_header_bytes: 8_000,
            max_query_bytes: 2_000,
            max_body_bytes: 10 * 1024 * 1024,
            max_json_depth: 10,
        }
    }
}

/// Which body encodings the gate inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    /// Body kind for a request, or `None` if the body is passed through
    /// uninspected (other methods or content types).
    pub fn of(method: &Method, headers: &HeaderMap) -> Option<Self> {
        if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
            return None;
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("application/json") {
            Some(BodyKind::Json)
        } else if content_type.contains("application/x-www-form-urlencoded") {
            Some(BodyKind::Form)
        } else {
            None
        }
    }
}

/// Where a suspicious value was found, for logs.
#[derive(Debug, Clone, Copy)]
enum Location {
    Header,
    Query,
    PathParam,
    JsonKey,
    JsonValue,
}

impl Location {
    fn as_str(self) -> &'static str {
        match self {
            Location::Header => "header",
            Location::Query => "query",
            Location::PathParam => "path_param",
            Location::JsonKey => "json_key",
            Location::JsonValue => "json_value",
        }
    }
}

/// Stateless validator; safe to share across requests.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn strict_mode(&self) -> bool {
        self.config.strict_mode
    }

    /// Run every check against `req`.
    ///
    /// # Errors
    ///
    /// Returns the first violation found. Lenient-mode findings are logged and
    /// never returned.
    pub fn validate<R: RequestView + ?Sized>(&self, req: &R) -> Result<(), GateError> {
        self.validate_headers(req)?;
        self.validate_query(req)?;
        self.validate_path_params(req)?;
        self.validate_body(req)
    }

    /// Header size ceiling and per-value substring scan.
    pub fn validate_headers<R: RequestView + ?Sized>(&self, req: &R) -> Result<(), GateError> {
        let headers = req.headers();

        let total: usize = headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        if total > self.config.max_header_bytes {
            return Err(GateError::HeaderTooLarge);
        }

        for (name, value) in headers {
            let text = String::from_utf8_lossy(value.as_bytes());
            if let Some(category) = patterns::header_threat(&text)
                && self.finding(req, Location::Header, name.as_str(), category, &text)
            {
                return Err(GateError::HeaderMalicious(name.as_str().to_string()));
            }
        }

        Ok(())
    }

    /// Query length ceiling and injection scan.
    ///
    /// Clients percent-encode quotes and spaces, so the decoded keys and
    /// values are scanned as well as the raw string.
    pub fn validate_query<R: RequestView + ?Sized>(&self, req: &R) -> Result<(), GateError> {
        let Some(query) = req.query().filter(|q| !q.is_empty()) else {
            return Ok(());
        };

        if query.len() > self.config.max_query_bytes {
            return Err(GateError::QueryTooLong);
        }

        let decoded = url::form_urlencoded::parse(query.as_bytes())
            .flat_map(|(key, value)| [key.into_owned(), value.into_owned()]);

        let hit = std::iter::once(query.to_string())
            .chain(decoded)
            .find_map(|candidate| patterns::find_injection(&candidate).map(|p| (p, candidate)));

        match hit {
            Some((pattern, candidate))
                if self.finding(req, Location::Query, "query", pattern.category, &candidate) =>
            {
                Err(GateError::QueryMalicious)
            }
            _ => Ok(()),
        }
    }

    /// Shape checks for id and slug parameters, injection scan for the rest.
    pub fn validate_path_params<R: RequestView + ?Sized>(
        &self,
        req: &R,
    ) -> Result<(), GateError> {
        for (name, value) in req.path_params() {
            let lower_name = name.to_lowercase();

            if lower_name.contains("id") && value.chars().count() == 36 {
                if !patterns::is_uuid(value) {
                    return Err(GateError::PathParamInvalid {
                        name: name.clone(),
                        kind: PathParamKind::Uuid,
                    });
                }
            } else if lower_name.contains("slug") {
                if !patterns::is_slug(value) {
                    return Err(GateError::PathParamInvalid {
                        name: name.clone(),
                        kind: PathParamKind::Slug,
                    });
                }
            } else if let Some(pattern) = patterns::find_injection(value)
                && self.finding(req, Location::PathParam, name, pattern.category, value)
            {
                return Err(GateError::PathParamInvalid {
                    name: name.clone(),
                    kind: PathParamKind::Injection,
                });
            }
        }

        Ok(())
    }

    /// Size, syntax, depth and key checks for inspected bodies.
    pub fn validate_body<R: RequestView + ?Sized>(&self, req: &R) -> Result<(), GateError> {
        let Some(kind) = BodyKind::of(req.method(), req.headers()) else {
            return Ok(());
        };

        let body = req.body();
        if body.len() > self.config.max_body_bytes {
            return Err(GateError::BodyTooLarge);
        }

        if kind == BodyKind::Form {
            return Ok(());
        }

        // One container beyond the limit guarantees a value past it, so this
        // cheap scan also keeps the parser and the walk below shallow
        if exceeds_nesting(body, self.config.max_json_depth.saturating_add(1)) {
            return Err(GateError::BodyTooDeep);
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|_| GateError::BodyMalformed("Invalid JSON in request body".to_string()))?;

        self.walk_json(req, &value, 0)
    }

    fn walk_json<R: RequestView + ?Sized>(
        &self,
        req: &R,
        value: &Value,
        depth: usize,
    ) -> Result<(), GateError> {
        if depth > self.config.max_json_depth {
            return Err(GateError::BodyTooDeep);
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if let Some(pattern) = patterns::find_injection(key)
                        && self.finding(req, Location::JsonKey, key, pattern.category, key)
                    {
                        return Err(GateError::BodyMalformed(format!(
                            "Potentially malicious JSON key: {}",
                            preview(key)
                        )));
                    }
                    self.walk_json(req, child, depth + 1)?;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk_json(req, item, depth + 1)?;
                }
            }
            Value::String(text) => {
                if let Some(pattern) = patterns::find_injection(text) {
                    self.log_finding(req, Location::JsonValue, "value", pattern.category, text);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Record a pattern hit. Returns `true` when it must be rejected.
    fn finding<R: RequestView + ?Sized>(
        &self,
        req: &R,
        location: Location,
        name: &str,
        category: Category,
        value: &str,
    ) -> bool {
        if self.config.strict_mode {
            return true;
        }
        self.log_finding(req, location, name, category, value);
        false
    }

    fn log_finding<R: RequestView + ?Sized>(
        &self,
        req: &R,
        location: Location,
        name: &str,
        category: Category,
        value: &str,
    ) {
        metrics::record_validation_warning(category.as_str());
        warn!(
            path = req.path(),
            method = %req.method(),
            location = location.as_str(),
            name,
            category = category.as_str(),
            preview = %preview(value),
            "Suspicious input allowed through"
        );
    }
}

/// Whether JSON text nests more than `limit` arrays or objects.
///
/// Brackets inside string literals are ignored. Malformed input is left for
/// the parser to report.
fn exceeds_nesting(bytes: &[u8], limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    false
}
