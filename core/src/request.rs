//! Request view.
//!
//! [`RequestView`] is derived once from an [`HttpScope`] and the collected body
//! and is read-only afterwards.

use crate::error::{FieldErrors, SlimError};
use crate::protocol::{HeaderPairs, HttpScope};
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;

/// Methods that carry a request body.
pub const POST_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Raw request data handed to a validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A JSON document (request bodies sent as JSON).
    Json(Value),
    /// String pairs (query strings, form bodies, headers). Values are coerced
    /// to the declared field types during validation.
    Form(IndexMap<String, String>),
}

impl Payload {
    /// Empty JSON object.
    #[must_use]
    pub fn empty() -> Self {
        Self::Json(Value::Object(serde_json::Map::new()))
    }

    /// Look up a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Json(value) => value.get(key).cloned(),
            Self::Form(pairs) => pairs.get(key).map(|v| Value::String(v.clone())),
        }
    }

    /// The payload as a JSON value; form pairs become an object of strings.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Form(pairs) => Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

/// Uniform, read-only view of an inbound HTTP request.
#[derive(Debug, Clone)]
pub struct RequestView {
    method: String,
    path: String,
    query_string: Bytes,
    headers: HeaderPairs,
    origin: Option<String>,
    body: Bytes,
}

impl RequestView {
    /// Build the view from a scope. The body starts empty.
    #[must_use]
    pub fn from_scope(scope: &HttpScope) -> Self {
        let origin = scope
            .headers
            .iter()
            .find(|(name, _)| name.as_ref() == b"origin")
            .map(|(_, value)| String::from_utf8_lossy(value).into_owned());

        Self {
            method: scope.method.to_ascii_uppercase(),
            path: scope.path.clone(),
            query_string: scope.query_string.clone(),
            headers: scope.headers.clone(),
            origin,
            body: Bytes::new(),
        }
    }

    /// Attach the collected request body.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Upper-cased request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value of the `Origin` header, if sent.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Raw request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the method carries a body.
    #[must_use]
    pub fn is_post_family(&self) -> bool {
        POST_METHODS.contains(&self.method.as_str())
    }

    /// First value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }

    /// Headers as a map of lower-cased names; the first value of a repeated
    /// header wins.
    #[must_use]
    pub fn headers(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        for (name, value) in &self.headers {
            map.entry(String::from_utf8_lossy(name).to_ascii_lowercase())
                .or_insert_with(|| String::from_utf8_lossy(value).into_owned());
        }
        map
    }

    /// Query parameters. Repeated names are not folded into lists: the
    /// first occurrence wins.
    #[must_use]
    pub fn params(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        for (key, value) in form_urlencoded::parse(&self.query_string) {
            map.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        map
    }

    /// Parse the body: JSON when the content type says so, form pairs
    /// otherwise. An empty body is an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`SlimError::InvalidPostData`] when a JSON body does not parse.
    pub fn post_data(&self) -> Result<Payload, SlimError> {
        if self.body.is_empty() {
            return Ok(Payload::empty());
        }

        let is_json = self
            .header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));

        if is_json {
            serde_json::from_slice(&self.body)
                .map(Payload::Json)
                .map_err(|e| {
                    SlimError::InvalidPostData(FieldErrors::single(
                        FieldErrors::ROOT,
                        format!("malformed json: {e}"),
                    ))
                })
        } else {
            let mut pairs = IndexMap::new();
            for (key, value) in form_urlencoded::parse(&self.body) {
                pairs.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
            Ok(Payload::Form(pairs))
        }
    }
}
