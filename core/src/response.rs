//! Response model.
//!
//! A [`Response`] is plain data. It is built by a handler (or by the framework
//! for the 404 fallback, CORS preflight and error translation) and rendered
//! once when the dispatch loop sends it.

use crate::protocol::HeaderPairs;
use bytes::Bytes;
use http::StatusCode;
use indexmap::IndexMap;

/// `Content-Type` header name.
pub const CONTENT_TYPE: &str = "Content-Type";
/// `Set-Cookie` header name.
pub const SET_COOKIE: &str = "Set-Cookie";

/// Default content type of a response.
pub const TEXT_PLAIN: &str = "text/plain";
/// Content type of a JSON response.
pub const APPLICATION_JSON: &str = "application/json";

/// Response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body; renders as zero bytes.
    #[default]
    Empty,
    /// Raw bytes, sent unchanged.
    Bytes(Bytes),
    /// Text, sent UTF-8 encoded.
    Text(String),
    /// Structured value, sent JSON encoded.
    Json(serde_json::Value),
}

/// A cookie to be emitted as a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (not validated).
    pub value: String,
    /// `Expires` attribute, rendered verbatim.
    pub expires: Option<String>,
    /// `Max-Age` attribute in seconds.
    pub max_age: Option<i64>,
    /// `Domain` attribute.
    pub domain: Option<String>,
    /// `Path` attribute.
    pub path: Option<String>,
    /// `Secure` flag.
    pub secure: bool,
    /// `HttpOnly` flag.
    pub http_only: bool,
}

impl Cookie {
    /// Create a session cookie with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            max_age: None,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
        }
    }

    /// Set `Expires`.
    #[must_use]
    pub fn with_expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    /// Set `Max-Age`.
    #[must_use]
    pub const fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Set `Domain`.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set `Path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the `Secure` flag.
    #[must_use]
    pub const fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `HttpOnly` flag.
    #[must_use]
    pub const fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Render the `Set-Cookie` value.
    ///
    /// Attribute order is fixed: `Expires`, `Max-Age`, `Domain`, `Path`,
    /// then the `Secure` and `HttpOnly` flags.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut value = format!("{}={}", self.name, self.value);

        if let Some(expires) = &self.expires {
            value.push_str("; Expires=");
            value.push_str(expires);
        }
        if let Some(max_age) = self.max_age {
            value.push_str("; Max-Age=");
            value.push_str(&max_age.to_string());
        }
        if let Some(domain) = &self.domain {
            value.push_str("; Domain=");
            value.push_str(domain);
        }
        if let Some(path) = &self.path {
            value.push_str("; Path=");
            value.push_str(path);
        }
        if self.secure {
            value.push_str("; Secure");
        }
        if self.http_only {
            value.push_str("; HttpOnly");
        }

        value
    }
}

/// An HTTP response waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code.
    pub status: StatusCode,
    /// Body.
    pub body: Body,
    /// Explicit headers, in insertion order.
    pub headers: IndexMap<String, String>,
    /// Value of the `Content-Type` header.
    pub content_type: String,
    /// Cookies keyed by name.
    pub cookies: IndexMap<String, Cookie>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Body::Empty,
            headers: IndexMap::new(),
            content_type: TEXT_PLAIN.to_string(),
            cookies: IndexMap::new(),
        }
    }
}

impl Response {
    /// Empty `200 OK` response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain text response.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Body::Text(body.into()),
            ..Self::default()
        }
    }

    /// JSON response with `application/json` content type.
    #[must_use]
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: Body::Json(body),
            content_type: APPLICATION_JSON.to_string(),
            ..Self::default()
        }
    }

    /// Raw bytes response with the given content type.
    #[must_use]
    pub fn bytes(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: Body::Bytes(body.into()),
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    /// The fallback sent for unmatched routes: `404`, `text/plain`, `not found`.
    #[must_use]
    pub fn not_found() -> Self {
        Self::text("not found").with_status(StatusCode::NOT_FOUND)
    }

    /// Replace the status code.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set an explicit header, replacing a previous value of the same name
    /// in any letter case.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), value.into());
        self
    }

    /// Add a cookie, replacing a previous cookie of the same name.
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.insert(cookie.name.clone(), cookie);
        self
    }

    /// Merge headers into the explicit header map; incoming values win.
    /// Names compare case-insensitively.
    pub fn merge_headers(&mut self, headers: IndexMap<String, String>) {
        for (name, value) in headers {
            self.set_header(name, value);
        }
    }

    fn set_header(&mut self, name: String, value: String) {
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value);
    }

    /// Whether the body is rendered as JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.body, Body::Json(_))
    }

    /// Render the body to bytes.
    #[must_use]
    pub fn get_body(&self) -> Bytes {
        match &self.body {
            Body::Empty => Bytes::new(),
            Body::Bytes(bytes) => bytes.clone(),
            Body::Text(text) => Bytes::from(text.clone().into_bytes()),
            Body::Json(value) => Bytes::from(serde_json::to_vec(value).unwrap_or_default()),
        }
    }

    /// Render the header list: content type, one `Set-Cookie` per cookie,
    /// then explicit headers.
    #[must_use]
    pub fn build_headers(&self) -> HeaderPairs {
        let mut headers: Vec<(String, String)> =
            Vec::with_capacity(1 + self.cookies.len() + self.headers.len());

        headers.push((CONTENT_TYPE.to_string(), self.content_type.clone()));

        for cookie in self.cookies.values() {
            headers.push((SET_COOKIE.to_string(), cookie.header_value()));
        }

        for (name, value) in &self.headers {
            headers.push((name.clone(), value.clone()));
        }

        headers
            .into_iter()
            .map(|(name, value)| (Bytes::from(name), Bytes::from(value)))
            .collect()
    }
}
