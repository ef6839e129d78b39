//! CORS policy.
//!
//! Each [`CorsOptions`] names a host, but host matching is not performed:
//! every configured policy is applied to every request regardless of its
//! `Origin`. The dispatch tests pin this behaviour down.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `Access-Control-Allow-Origin`
pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
/// `Access-Control-Allow-Credentials`
pub const ACCESS_CONTROL_ALLOW_CREDENTIALS: &str = "Access-Control-Allow-Credentials";
/// `Access-Control-Expose-Headers`
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";
/// `Access-Control-Allow-Headers`
pub const ACCESS_CONTROL_ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";
/// `Access-Control-Max-Age`
pub const ACCESS_CONTROL_MAX_AGE: &str = "Access-Control-Max-Age";
/// `Access-Control-Allow-Methods`
pub const ACCESS_CONTROL_ALLOW_METHODS: &str = "Access-Control-Allow-Methods";

/// A header value given either verbatim or as a list to be comma-joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderList {
    /// Passed through unchanged.
    Single(String),
    /// Joined with `,`.
    Many(Vec<String>),
}

impl HeaderList {
    /// Whether the rendered value would be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(value) => value.is_empty(),
            Self::Many(values) => values.is_empty(),
        }
    }

    /// Render to a header value.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Many(values) => values.join(","),
        }
    }
}

impl Default for HeaderList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl From<&str> for HeaderList {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderList {
    fn from(values: [&str; N]) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

impl From<Vec<String>> for HeaderList {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Cross-origin policy for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    /// Host the policy is declared for (not enforced).
    pub host: String,
    /// Whether credentials are allowed.
    pub allow_credentials: bool,
    /// Headers exposed to the browser.
    pub expose_headers: Option<HeaderList>,
    /// Headers the browser may send.
    pub allow_headers: HeaderList,
    /// Preflight cache lifetime in seconds; `0` omits the header.
    pub max_age: Option<u64>,
    /// Methods the browser may use.
    pub allow_methods: Option<HeaderList>,
}

impl CorsOptions {
    /// Create a policy for a host with everything else off.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Allow credentials.
    #[must_use]
    pub const fn with_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Set exposed headers.
    #[must_use]
    pub fn with_expose_headers(mut self, headers: impl Into<HeaderList>) -> Self {
        self.expose_headers = Some(headers.into());
        self
    }

    /// Set allowed request headers.
    #[must_use]
    pub fn with_allow_headers(mut self, headers: impl Into<HeaderList>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Set the preflight max age.
    #[must_use]
    pub const fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Set allowed methods.
    #[must_use]
    pub fn with_allow_methods(mut self, methods: impl Into<HeaderList>) -> Self {
        self.allow_methods = Some(methods.into());
        self
    }

    /// Build the CORS headers for a request coming from `origin`.
    ///
    /// Allow-origin echoes the origin (empty when the request had none) and
    /// allow-credentials is always present. The remaining headers appear only
    /// when configured with a non-empty value.
    #[must_use]
    pub fn pack_headers(&self, origin: Option<&str>) -> IndexMap<String, String> {
        let mut headers = IndexMap::new();

        headers.insert(
            ACCESS_CONTROL_ALLOW_ORIGIN.to_string(),
            origin.unwrap_or_default().to_string(),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS.to_string(),
            if self.allow_credentials { "true" } else { "false" }.to_string(),
        );

        if let Some(expose) = self.expose_headers.as_ref().filter(|h| !h.is_empty()) {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS.to_string(), expose.render());
        }
        if !self.allow_headers.is_empty() {
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS.to_string(),
                self.allow_headers.render(),
            );
        }
        if let Some(max_age) = self.max_age.filter(|age| *age > 0) {
            headers.insert(ACCESS_CONTROL_MAX_AGE.to_string(), max_age.to_string());
        }
        if let Some(methods) = self.allow_methods.as_ref().filter(|m| !m.is_empty()) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS.to_string(), methods.render());
        }

        headers
    }
}
