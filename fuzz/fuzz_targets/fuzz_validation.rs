//! Fuzz testing for the input validation gate.
//!
//! Feeds arbitrary query strings, path parameters, header values and JSON
//! bodies through `Validator::validate` in both strict and lenient mode. The
//! gate must never panic, whatever the input; in particular the JSON nesting
//! pre-scan has to hold up against unbalanced brackets and unterminated
//! strings.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use kb_gate::validation::{ValidationConfig, Validator};
use kb_gate::RequestContext;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    strict: bool,
    query: &'a str,
    param_name: &'a str,
    param_value: &'a str,
    header_value: &'a [u8],
    body: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let validator = Validator::new(ValidationConfig {
        strict_mode: input.strict,
        ..ValidationConfig::default()
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_bytes(input.header_value) {
        headers.insert("x-fuzz", value);
    }

    let uri = format!("/api/v1/knowledge?{}", input.query);
    let ctx = RequestContext::new(Method::POST, &uri)
        .with_headers(headers)
        .with_path_params(vec![(
            input.param_name.to_string(),
            input.param_value.to_string(),
        )])
        .with_body(input.body.to_vec());

    let _ = validator.validate(&ctx);
});
