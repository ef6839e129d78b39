//! Request validation.
//!
//! A schema is any serde type implementing [`Schema`]. Validation is
//! non-strict (unknown keys are ignored) and full (every declared field is
//! checked). String sources such as query strings, headers and form bodies
//! are coerced to the declared scalar types; JSON bodies are taken as typed.
//!
//! The validated value is stored in its normalized JSON form on
//! [`ValidatedData`] and read back typed by the handler.

use crate::error::{FieldErrors, SlimError};
use crate::request::{Payload, RequestView};
use crate::view::{BuiltinInterface, ViewKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A type requests can be validated against.
///
/// Implement [`Schema::validate`] for constraints serde cannot express.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use slim_core::{FieldErrors, Schema};
///
/// #[derive(Serialize, Deserialize)]
/// struct Page {
///     page: u32,
/// }
///
/// impl Schema for Page {
///     fn validate(&self) -> Result<(), FieldErrors> {
///         if self.page == 0 {
///             return Err(FieldErrors::single("page", "must be at least 1"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Schema: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Extra constraints checked after deserialization.
    ///
    /// # Errors
    ///
    /// Returns the offending fields.
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

impl Schema for Value {}

type ValidateFn = dyn Fn(&Payload) -> Result<Value, FieldErrors> + Send + Sync;

/// Type-erased validator for one [`Schema`] type.
#[derive(Clone)]
pub struct Validator {
    name: &'static str,
    run: Arc<ValidateFn>,
}

impl Validator {
    /// Validator for `T`.
    #[must_use]
    pub fn of<T: Schema>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            run: Arc::new(validate_as::<T>),
        }
    }

    /// Name of the schema type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Validate a payload, returning the normalized value.
    ///
    /// # Errors
    ///
    /// Returns the per-field errors.
    pub fn validate(&self, payload: &Payload) -> Result<Value, FieldErrors> {
        (self.run)(payload)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Validator").field(&self.name).finish()
    }
}

fn validate_as<T: Schema>(payload: &Payload) -> Result<Value, FieldErrors> {
    let parsed: T = match payload {
        Payload::Json(value) => serde_path_to_error::deserialize(value).map_err(path_errors)?,
        Payload::Form(pairs) => {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            let deserializer =
                serde_urlencoded::Deserializer::new(form_urlencoded::parse(encoded.as_bytes()));
            serde_path_to_error::deserialize(deserializer).map_err(path_errors)?
        }
    };

    parsed.validate()?;

    serde_json::to_value(&parsed).map_err(|e| FieldErrors::single(FieldErrors::ROOT, e.to_string()))
}

fn path_errors<E: fmt::Display>(err: serde_path_to_error::Error<E>) -> FieldErrors {
    let path = err.path().to_string();
    let field = if path.is_empty() || path == "." {
        FieldErrors::ROOT.to_string()
    } else {
        path
    };
    FieldErrors::single(field, err.inner().to_string())
}

/// Validators declared on a route.
#[derive(Debug, Clone, Default)]
pub struct Validators {
    /// Applied to query parameters.
    pub query: Option<Validator>,
    /// Applied to the whole request body.
    pub post: Option<Validator>,
    /// Applied to request headers.
    pub headers: Option<Validator>,
    /// Applied to values written through a SQL view.
    pub write_value: Option<Validator>,
}

impl Validators {
    /// Whether nothing is declared.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.query.is_none()
            && self.post.is_none()
            && self.headers.is_none()
            && self.write_value.is_none()
    }
}

/// Outputs of validation for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedData {
    /// Validated query parameters.
    pub query: Option<Value>,
    /// Validated request body.
    pub post: Option<Value>,
    /// Validated request headers.
    pub headers: Option<Value>,
    /// Validated write values (one per item for bulk inserts).
    pub write_values: Option<Vec<Value>>,
}

fn typed<T: DeserializeOwned>(value: Option<&Value>) -> Result<Option<T>, SlimError> {
    value
        .map(|v| T::deserialize(v).map_err(|e| SlimError::Internal(e.to_string())))
        .transpose()
}

impl ValidatedData {
    /// Validated query parameters as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SlimError::Internal`] if `T` does not match the declared schema.
    pub fn query<T: DeserializeOwned>(&self) -> Result<Option<T>, SlimError> {
        typed(self.query.as_ref())
    }

    /// Validated body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SlimError::Internal`] if `T` does not match the declared schema.
    pub fn post<T: DeserializeOwned>(&self) -> Result<Option<T>, SlimError> {
        typed(self.post.as_ref())
    }

    /// Validated headers as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SlimError::Internal`] if `T` does not match the declared schema.
    pub fn headers<T: DeserializeOwned>(&self) -> Result<Option<T>, SlimError> {
        typed(self.headers.as_ref())
    }
}

/// Run every declared validator against a request.
///
/// Write values are only validated for SQL views on body-carrying methods:
/// bulk inserts validate each element of the `items` list, set/new validate
/// the whole body. Any failure discards everything validated so far.
///
/// # Errors
///
/// Returns [`SlimError::InvalidQuery`], [`SlimError::InvalidPostData`] or
/// [`SlimError::InvalidHeaders`] carrying the field errors.
pub fn validate_request(
    request: &RequestView,
    validators: &Validators,
    kind: ViewKind,
    interface: Option<BuiltinInterface>,
) -> Result<ValidatedData, SlimError> {
    let mut data = ValidatedData::default();

    if let Some(validator) = &validators.query {
        let params = Payload::Form(request.params());
        data.query = Some(validator.validate(&params).map_err(SlimError::InvalidQuery)?);
    }

    if request.is_post_family() {
        let post_data = request.post_data()?;

        if let (Some(validator), ViewKind::Sql) = (&validators.write_value, kind) {
            data.write_values = Some(validate_write_values(validator, &post_data, interface)?);
        }

        if let Some(validator) = &validators.post {
            data.post = Some(
                validator
                    .validate(&post_data)
                    .map_err(SlimError::InvalidPostData)?,
            );
        }
    }

    if let Some(validator) = &validators.headers {
        let headers = Payload::Form(request.headers());
        data.headers = Some(validator.validate(&headers).map_err(SlimError::InvalidHeaders)?);
    }

    Ok(data)
}

fn validate_write_values(
    validator: &Validator,
    post_data: &Payload,
    interface: Option<BuiltinInterface>,
) -> Result<Vec<Value>, SlimError> {
    let mut values = Vec::new();

    match interface {
        Some(BuiltinInterface::BulkInsert) => {
            let Some(Value::Array(items)) = post_data.get("items") else {
                return Err(SlimError::InvalidPostData(FieldErrors::single(
                    "items",
                    "`items` from post data should be list",
                )));
            };
            for item in items {
                values.push(
                    validator
                        .validate(&Payload::Json(item))
                        .map_err(SlimError::InvalidPostData)?,
                );
            }
        }
        Some(BuiltinInterface::Set | BuiltinInterface::New) => {
            values.push(validator.validate(post_data).map_err(SlimError::InvalidPostData)?);
        }
        _ => {}
    }

    Ok(values)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::HttpScope;
    use bytes::Bytes;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Paging {
        page: u32,
        size: Option<u32>,
    }

    impl Schema for Paging {
        fn validate(&self) -> Result<(), FieldErrors> {
            if self.page == 0 {
                return Err(FieldErrors::single("page", "must be at least 1"));
            }
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Topic {
        title: String,
        #[serde(default)]
        pinned: bool,
    }

    impl Schema for Topic {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Auth {
        #[serde(rename = "x-token")]
        token: String,
    }

    impl Schema for Auth {}

    fn request(method: &str, query: &str, body: &str) -> RequestView {
        let scope = HttpScope::new(method, "/")
            .with_query(query)
            .with_header("content-type", "application/json");
        RequestView::from_scope(&scope).with_body(Bytes::from(body.to_string()))
    }

    fn query_only() -> Validators {
        Validators {
            query: Some(Validator::of::<Paging>()),
            ..Validators::default()
        }
    }

    #[test]
    fn query_strings_are_coerced() {
        let data = validate_request(
            &request("GET", "page=2&size=10&unknown=x", ""),
            &query_only(),
            ViewKind::Plain,
            None,
        )
        .unwrap();

        assert_eq!(data.query, Some(json!({"page": 2, "size": 10})));
        let typed: Paging = data.query().unwrap().unwrap();
        assert_eq!(typed, Paging { page: 2, size: Some(10) });
    }

    #[test]
    fn bad_query_reports_field() {
        let err = validate_request(
            &request("GET", "page=abc", ""),
            &query_only(),
            ViewKind::Plain,
            None,
        )
        .unwrap_err();

        let SlimError::InvalidQuery(errors) = err else {
            panic!("expected invalid query, got {err:?}");
        };
        assert!(errors.get("page").is_some());
    }

    #[test]
    fn custom_constraints_run_after_parsing() {
        let err = validate_request(&request("GET", "page=0", ""), &query_only(), ViewKind::Plain, None)
            .unwrap_err();
        assert_eq!(
            err,
            SlimError::InvalidQuery(FieldErrors::single("page", "must be at least 1"))
        );
    }

    #[test]
    fn missing_field_is_a_schema_error() {
        let err = validate_request(&request("GET", "", ""), &query_only(), ViewKind::Plain, None)
            .unwrap_err();
        let SlimError::InvalidQuery(errors) = err else {
            panic!("expected invalid query");
        };
        assert!(errors.get(FieldErrors::ROOT).is_some());
    }

    #[test]
    fn post_validator_only_runs_for_post_methods() {
        let validators = Validators {
            post: Some(Validator::of::<Topic>()),
            ..Validators::default()
        };

        let data = validate_request(&request("GET", "", "{}"), &validators, ViewKind::Plain, None).unwrap();
        assert_eq!(data.post, None);

        let data = validate_request(
            &request("POST", "", r#"{"title": "hi"}"#),
            &validators,
            ViewKind::Plain,
            None,
        )
        .unwrap();
        assert_eq!(data.post, Some(json!({"title": "hi", "pinned": false})));
    }

    #[test]
    fn bulk_insert_fails_as_a_whole() {
        let validators = Validators {
            write_value: Some(Validator::of::<Topic>()),
            ..Validators::default()
        };

        let err = validate_request(
            &request("POST", "", r#"{"items": [{"title": "a"}, {"pinned": true}]}"#),
            &validators,
            ViewKind::Sql,
            Some(BuiltinInterface::BulkInsert),
        )
        .unwrap_err();
        assert!(matches!(err, SlimError::InvalidPostData(_)));

        let data = validate_request(
            &request("POST", "", r#"{"items": [{"title": "a"}, {"title": "b"}]}"#),
            &validators,
            ViewKind::Sql,
            Some(BuiltinInterface::BulkInsert),
        )
        .unwrap();
        assert_eq!(data.write_values.map(|v| v.len()), Some(2));
    }

    #[test]
    fn bulk_insert_requires_a_list() {
        let validators = Validators {
            write_value: Some(Validator::of::<Topic>()),
            ..Validators::default()
        };

        let err = validate_request(
            &request("POST", "", r#"{"items": {"title": "a"}}"#),
            &validators,
            ViewKind::Sql,
            Some(BuiltinInterface::BulkInsert),
        )
        .unwrap_err();

        assert_eq!(
            err,
            SlimError::InvalidPostData(FieldErrors::single(
                "items",
                "`items` from post data should be list"
            ))
        );
    }

    #[test]
    fn write_values_skipped_for_plain_views() {
        let validators = Validators {
            write_value: Some(Validator::of::<Topic>()),
            ..Validators::default()
        };

        let data = validate_request(
            &request("POST", "", r#"{"nothing": 1}"#),
            &validators,
            ViewKind::Plain,
            Some(BuiltinInterface::New),
        )
        .unwrap();
        assert_eq!(data.write_values, None);
    }

    #[test]
    fn set_and_new_validate_whole_body() {
        let validators = Validators {
            write_value: Some(Validator::of::<Topic>()),
            ..Validators::default()
        };

        for interface in [BuiltinInterface::Set, BuiltinInterface::New] {
            let data = validate_request(
                &request("POST", "", r#"{"title": "t", "pinned": true}"#),
                &validators,
                ViewKind::Sql,
                Some(interface),
            )
            .unwrap();
            assert_eq!(data.write_values, Some(vec![json!({"title": "t", "pinned": true})]));
        }
    }

    #[test]
    fn headers_are_validated() {
        let validators = Validators {
            headers: Some(Validator::of::<Auth>()),
            ..Validators::default()
        };
        let scope = HttpScope::new("GET", "/").with_header("X-Token", "secret");
        let data = validate_request(
            &RequestView::from_scope(&scope),
            &validators,
            ViewKind::Plain,
            None,
        )
        .unwrap();
        assert_eq!(data.headers, Some(json!({"x-token": "secret"})));

        let err = validate_request(&request("GET", "", ""), &validators, ViewKind::Plain, None)
            .unwrap_err();
        assert!(matches!(err, SlimError::InvalidHeaders(_)));
    }

    #[test]
    fn validation_is_repeatable() {
        let validator = Validator::of::<Topic>();
        let payload = Payload::Json(json!({"title": "same"}));

        let first = validator.validate(&payload).unwrap();
        let second = validator.validate(&payload).unwrap();
        assert_eq!(first, second);
    }
}
