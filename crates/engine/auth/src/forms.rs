//! Form error state
//!
//! Pure transforms over [`FormErrorState`] used by the login and account
//! forms. Nothing here mutates its input; every operation returns a new state.
//!
//! A field error is only shown once the field has been touched, so a form can
//! carry latent errors for fields the user has not reached yet.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::warn;

/// Message used for fields reported invalid without a specific message.
pub const INVALID_FIELD_MESSAGE: &str = "This field is invalid";

/// Error display state for one form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormErrorState {
    pub form_error: Option<String>,
    pub field_errors: BTreeMap<String, String>,
    /// A field missing from the map counts as untouched.
    pub touched_fields: BTreeMap<String, bool>,
}

impl FormErrorState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// State carrying only a form-level message.
    pub fn with_form_error(message: impl Into<String>) -> Self {
        Self {
            form_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn mark_field_touched(&self, field: &str) -> Self {
        let mut next = self.clone();
        next.touched_fields.insert(field.to_string(), true);
        next
    }

    /// Mark `fields` touched, or every field that currently has an error.
    pub fn mark_all_fields_touched(&self, fields: Option<&[&str]>) -> Self {
        let mut next = self.clone();
        match fields {
            Some(fields) => {
                for field in fields {
                    next.touched_fields.insert(field.to_string(), true);
                }
            }
            None => {
                for field in self.field_errors.keys() {
                    next.touched_fields.insert(field.clone(), true);
                }
            }
        }
        next
    }

    /// Set a field error and mark the field touched so it shows immediately.
    pub fn set_field_error(&self, field: &str, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.field_errors.insert(field.to_string(), message.into());
        next.touched_fields.insert(field.to_string(), true);
        next
    }

    /// Remove one field error. Touched state is left alone.
    pub fn clear_field_error(&self, field: &str) -> Self {
        let mut next = self.clone();
        next.field_errors.remove(field);
        next
    }

    pub fn set_form_error(&self, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.form_error = Some(message.into());
        next
    }

    /// Drop all messages; touched state survives.
    pub fn clear_all_errors(&self) -> Self {
        Self {
            form_error: None,
            field_errors: BTreeMap::new(),
            touched_fields: self.touched_fields.clone(),
        }
    }

    pub fn is_touched(&self, field: &str) -> bool {
        self.touched_fields.get(field).copied().unwrap_or(false)
    }

    pub fn has_visible_field_error(&self, field: &str) -> bool {
        self.field_errors.contains_key(field) && self.is_touched(field)
    }

    /// The field's message, but only while it is visible.
    pub fn field_error_message(&self, field: &str) -> Option<&str> {
        if self.is_touched(field) {
            self.field_errors.get(field).map(String::as_str)
        } else {
            None
        }
    }

    /// Whether the form has problems at all, shown or not.
    pub fn has_any_error(&self) -> bool {
        self.form_error.is_some() || !self.field_errors.is_empty()
    }
}

/// An error carrying per-field problems alongside its message.
///
/// Found anywhere in an error's `source()` chain by
/// [`extract_from_api_error`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FieldValidationError {
    pub message: String,
    pub invalid_fields: Vec<String>,
    pub field_errors: BTreeMap<String, String>,
}

impl FieldValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn invalid_field(mut self, field: impl Into<String>) -> Self {
        self.invalid_fields.push(field.into());
        self
    }

    pub fn field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors.insert(field.into(), message.into());
        self
    }
}

/// Anything a form may be handed as "the error".
#[derive(Debug, Clone, Copy)]
pub enum ErrorInput<'a> {
    /// JSON body returned by the API.
    Api(&'a Value),
    /// A Rust error value.
    Native(&'a (dyn std::error::Error + 'static)),
    /// A bare message.
    Message(&'a str),
}

impl<'a> ErrorInput<'a> {
    pub fn native<E: std::error::Error + 'static>(error: &'a E) -> Self {
        ErrorInput::Native(error)
    }
}

impl<'a> From<&'a Value> for ErrorInput<'a> {
    fn from(value: &'a Value) -> Self {
        ErrorInput::Api(value)
    }
}

impl<'a> From<&'a str> for ErrorInput<'a> {
    fn from(message: &'a str) -> Self {
        ErrorInput::Message(message)
    }
}

impl<'a> From<&'a String> for ErrorInput<'a> {
    fn from(message: &'a String) -> Self {
        ErrorInput::Message(message)
    }
}

/// Per-field problems pulled out of an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldProblems {
    pub field_errors: BTreeMap<String, String>,
    pub invalid_fields: Vec<String>,
}

impl FieldProblems {
    fn into_messages(self) -> BTreeMap<String, String> {
        let mut messages = self.field_errors;
        for field in self.invalid_fields {
            messages
                .entry(field)
                .or_insert_with(|| INVALID_FIELD_MESSAGE.to_string());
        }
        messages
    }
}

/// The recognised error shapes, decided before any state is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorShape {
    ApiValidation {
        message: Option<String>,
        code: Option<String>,
        fields: FieldProblems,
    },
    NativeWithFields {
        message: String,
        fields: FieldProblems,
    },
    PlainMessage(String),
    Unknown,
}

/// Why an input could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unreadable error value: {0}")]
pub struct ClassifyError(String);

/// Decide which [`ErrorShape`] `input` has.
pub fn classify(input: ErrorInput<'_>) -> Result<ErrorShape, ClassifyError> {
    match input {
        ErrorInput::Api(value) => classify_json(value),
        ErrorInput::Native(error) => classify_native(error),
        ErrorInput::Message(message) => Ok(ErrorShape::PlainMessage(message.to_string())),
    }
}

fn classify_json(value: &Value) -> Result<ErrorShape, ClassifyError> {
    let object = match value {
        Value::String(message) => return Ok(ErrorShape::PlainMessage(message.clone())),
        Value::Object(object) => object,
        _ => return Ok(ErrorShape::Unknown),
    };

    // `{error: {...}}` envelopes and bare `{message, code, details}` bodies
    let (body, envelope_message) = match object.get("error") {
        Some(Value::Object(inner)) => (inner, None),
        Some(Value::String(message)) => (object, Some(message.clone())),
        _ => (object, None),
    };

    let message = match optional_string(body, "message")? {
        Some(message) => Some(message),
        None => envelope_message,
    };
    let code = optional_string(body, "code")?;

    let fields = match body.get("details") {
        Some(Value::Object(details)) => field_problems(details)?,
        Some(Value::Null) | None => field_problems(body)?,
        Some(other) => {
            return Err(ClassifyError(format!("details is not an object: {}", other)));
        }
    };

    if message.is_none() && code.is_none() && fields == FieldProblems::default() {
        return Ok(ErrorShape::Unknown);
    }

    Ok(ErrorShape::ApiValidation {
        message,
        code,
        fields,
    })
}

fn optional_string(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ClassifyError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ClassifyError(format!("{} is not a string: {}", key, other))),
    }
}

fn field_problems(object: &Map<String, Value>) -> Result<FieldProblems, ClassifyError> {
    let mut problems = FieldProblems::default();

    match object.get("fieldErrors") {
        None | Some(Value::Null) => {}
        Some(Value::Object(errors)) => {
            for (field, message) in errors {
                let message = message.as_str().ok_or_else(|| {
                    ClassifyError(format!("fieldErrors.{} is not a string", field))
                })?;
                problems.field_errors.insert(field.clone(), message.to_string());
            }
        }
        Some(other) => {
            return Err(ClassifyError(format!("fieldErrors is not an object: {}", other)));
        }
    }

    match object.get("invalidFields") {
        None | Some(Value::Null) => {}
        Some(Value::Array(fields)) => {
            for field in fields {
                let field = field
                    .as_str()
                    .ok_or_else(|| ClassifyError(format!("invalid field name: {}", field)))?;
                problems.invalid_fields.push(field.to_string());
            }
        }
        Some(other) => {
            return Err(ClassifyError(format!("invalidFields is not an array: {}", other)));
        }
    }

    Ok(problems)
}

fn classify_native(error: &(dyn std::error::Error + 'static)) -> Result<ErrorShape, ClassifyError> {
    let mut message = String::new();
    write!(message, "{}", error)
        .map_err(|_| ClassifyError("error Display implementation failed".to_string()))?;

    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(validation) = err.downcast_ref::<FieldValidationError>() {
            return Ok(ErrorShape::NativeWithFields {
                message,
                fields: FieldProblems {
                    field_errors: validation.field_errors.clone(),
                    invalid_fields: validation.invalid_fields.clone(),
                },
            });
        }
        current = err.source();
    }

    Ok(ErrorShape::PlainMessage(message))
}

/// Build form error state from whatever error a request produced.
///
/// Total: unreadable input is logged and yields `default_message` as the
/// form error. The form error is never left empty.
pub fn extract_from_api_error<'a>(
    error: impl Into<ErrorInput<'a>>,
    default_message: &str,
) -> FormErrorState {
    let shape = match classify(error.into()) {
        Ok(shape) => shape,
        Err(err) => {
            warn!("Failed to extract form errors: {}", err);
            return FormErrorState::with_form_error(default_message);
        }
    };

    let (message, field_errors) = match shape {
        ErrorShape::ApiValidation {
            message, fields, ..
        } => (message, fields.into_messages()),
        ErrorShape::NativeWithFields { message, fields } => (Some(message), fields.into_messages()),
        ErrorShape::PlainMessage(message) => (Some(message), BTreeMap::new()),
        ErrorShape::Unknown => (None, BTreeMap::new()),
    };

    let form_error = message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| default_message.to_string());

    FormErrorState {
        form_error: Some(form_error),
        field_errors,
        touched_fields: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fmt;

    const DEFAULT: &str = "Something went wrong";

    fn with_errors(fields: &[&str]) -> FormErrorState {
        let mut state = FormErrorState::empty();
        for field in fields {
            state.field_errors.insert(field.to_string(), format!("{} is bad", field));
        }
        state
    }

    /// Error whose Display always fails.
    #[derive(Debug)]
    struct UnprintableError;

    impl fmt::Display for UnprintableError {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    impl std::error::Error for UnprintableError {}

    /// Error wrapping a validation error as its source.
    #[derive(Debug, Error)]
    #[error("request failed")]
    struct RequestError(#[source] FieldValidationError);

    #[test]
    fn test_empty_state() {
        let state = FormErrorState::empty();
        assert!(state.form_error.is_none());
        assert!(state.field_errors.is_empty());
        assert!(state.touched_fields.is_empty());
        assert!(!state.has_any_error());
    }

    #[test]
    fn test_visibility_requires_touch_and_error() {
        let state = with_errors(&["name"]);
        assert!(!state.has_visible_field_error("name"));
        assert!(state.field_error_message("name").is_none());

        let touched = state.mark_field_touched("name");
        assert!(touched.has_visible_field_error("name"));
        assert_eq!(touched.field_error_message("name"), Some("name is bad"));

        // Touched without an error is not visible either
        let touched_clean = FormErrorState::empty().mark_field_touched("email");
        assert!(!touched_clean.has_visible_field_error("email"));
        assert!(touched_clean.field_error_message("email").is_none());
    }

    #[test]
    fn test_visibility_matches_definition() {
        let state = with_errors(&["name", "email"])
            .mark_field_touched("email")
            .mark_field_touched("phone");

        for field in ["name", "email", "phone", "missing"] {
            let expected = state.field_errors.contains_key(field)
                && state.touched_fields.get(field) == Some(&true);
            assert_eq!(state.has_visible_field_error(field), expected, "field {}", field);
        }
    }

    #[test]
    fn test_mark_all_fields_touched_defaults_to_errors() {
        let state = with_errors(&["name", "email"]).mark_all_fields_touched(None);
        assert!(state.is_touched("name"));
        assert!(state.is_touched("email"));
        assert_eq!(state.touched_fields.len(), 2);
    }

    #[test]
    fn test_mark_all_fields_touched_explicit_list() {
        let state = with_errors(&["name", "email", "phone"])
            .mark_all_fields_touched(Some(&["name", "email"]));

        assert!(state.is_touched("name"));
        assert!(state.is_touched("email"));
        assert!(state.touched_fields.get("phone").is_none());
        assert!(!state.has_visible_field_error("phone"));
    }

    #[test]
    fn test_set_field_error_marks_touched() {
        let state = FormErrorState::empty().set_field_error("budget", "Budget must be positive");
        assert!(state.has_visible_field_error("budget"));
        assert_eq!(state.field_error_message("budget"), Some("Budget must be positive"));
    }

    #[test]
    fn test_clear_field_error() {
        let state = with_errors(&["name", "email"]).mark_field_touched("name");
        let cleared = state.clear_field_error("name");

        assert!(!cleared.field_errors.contains_key("name"));
        assert!(cleared.field_errors.contains_key("email"));
        assert_eq!(cleared.touched_fields, state.touched_fields);

        // Clearing again changes nothing
        assert_eq!(cleared.clear_field_error("name"), cleared);
    }

    #[test]
    fn test_clear_all_errors_keeps_touched() {
        let state = with_errors(&["name"])
            .set_form_error("Nope")
            .mark_field_touched("name");
        let cleared = state.clear_all_errors();

        assert!(!cleared.has_any_error());
        assert!(cleared.is_touched("name"));
    }

    #[test]
    fn test_has_any_error_ignores_touch() {
        assert!(with_errors(&["name"]).has_any_error());
        assert!(FormErrorState::empty().set_form_error("x").has_any_error());
    }

    #[test]
    fn test_operations_do_not_mutate_input() {
        let state = with_errors(&["name"]);
        let snapshot = state.clone();

        let _ = state.mark_field_touched("name");
        let _ = state.set_field_error("email", "bad");
        let _ = state.clear_field_error("name");
        let _ = state.clear_all_errors();

        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_extract_invalid_fields() {
        let body = json!({
            "error": {
                "message": "Validation failed",
                "code": "VALIDATION_ERROR",
                "details": { "invalidFields": ["name", "email"] }
            }
        });
        let state = extract_from_api_error(&body, DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some("Validation failed"));
        assert_eq!(state.field_errors.len(), 2);
        assert_eq!(state.field_errors["name"], INVALID_FIELD_MESSAGE);
        assert_eq!(state.field_errors["email"], INVALID_FIELD_MESSAGE);
        assert!(state.touched_fields.is_empty());
    }

    #[test]
    fn test_extract_field_errors_verbatim() {
        let body = json!({
            "error": {
                "message": "Please fix the highlighted fields",
                "details": { "fieldErrors": { "budget": "Budget must be at least 10 sats" } }
            }
        });
        let state = extract_from_api_error(&body, DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some("Please fix the highlighted fields"));
        assert_eq!(state.field_errors["budget"], "Budget must be at least 10 sats");
    }

    #[test]
    fn test_extract_code_only_uses_default() {
        let body = json!({
            "error": { "code": "VALIDATION_ERROR", "details": { "fieldErrors": {} } }
        });
        let state = extract_from_api_error(&body, DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some(DEFAULT));
        assert!(state.field_errors.is_empty());
    }

    #[test]
    fn test_extract_string_error_envelope() {
        let body = json!({ "error": "Invalid pubkey" });
        let state = extract_from_api_error(&body, DEFAULT);
        assert_eq!(state.form_error.as_deref(), Some("Invalid pubkey"));
    }

    #[test]
    fn test_extract_native_error() {
        let err = std::io::Error::other("boom");
        let state = extract_from_api_error(ErrorInput::native(&err), DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some("boom"));
        assert!(state.field_errors.is_empty());
    }

    #[test]
    fn test_extract_native_with_fields() {
        let err = FieldValidationError::new("Check your campaign")
            .invalid_field("name")
            .field_error("budget", "Too low");
        let state = extract_from_api_error(ErrorInput::native(&err), DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some("Check your campaign"));
        assert_eq!(state.field_errors["name"], INVALID_FIELD_MESSAGE);
        assert_eq!(state.field_errors["budget"], "Too low");
    }

    #[test]
    fn test_extract_native_fields_from_source_chain() {
        let err = RequestError(FieldValidationError::new("inner").invalid_field("email"));
        let state = extract_from_api_error(ErrorInput::native(&err), DEFAULT);

        assert_eq!(state.form_error.as_deref(), Some("request failed"));
        assert_eq!(state.field_errors["email"], INVALID_FIELD_MESSAGE);
    }

    #[test]
    fn test_extract_plain_string() {
        let state = extract_from_api_error("Network unreachable", DEFAULT);
        assert_eq!(state.form_error.as_deref(), Some("Network unreachable"));

        let empty = extract_from_api_error("", DEFAULT);
        assert_eq!(empty.form_error.as_deref(), Some(DEFAULT));
    }

    #[test]
    fn test_extract_is_total() {
        let inputs = [
            json!(null),
            json!(42),
            json!([1, 2, 3]),
            json!({}),
            json!({ "error": { "message": 17 } }),
            json!({ "error": { "details": { "fieldErrors": { "name": false } } } }),
            json!({ "error": { "details": { "invalidFields": "name" } } }),
            json!({ "error": { "details": [] } }),
        ];

        for input in &inputs {
            let state = extract_from_api_error(input, DEFAULT);
            assert_eq!(state.form_error.as_deref(), Some(DEFAULT), "input {}", input);
            assert!(state.field_errors.is_empty());
            assert!(state.touched_fields.is_empty());
        }

        let unprintable = UnprintableError;
        let state = extract_from_api_error(ErrorInput::native(&unprintable), DEFAULT);
        assert_eq!(state, FormErrorState::with_form_error(DEFAULT));
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(
            classify(ErrorInput::Message("x")).unwrap(),
            ErrorShape::PlainMessage("x".to_string())
        );
        assert_eq!(classify(ErrorInput::Api(&json!(true))).unwrap(), ErrorShape::Unknown);
        assert!(matches!(
            classify(ErrorInput::Api(&json!({ "message": "m", "code": "C" }))).unwrap(),
            ErrorShape::ApiValidation { message: Some(_), code: Some(_), .. }
        ));
        assert!(classify(ErrorInput::Api(&json!({ "message": [] }))).is_err());
    }
}
