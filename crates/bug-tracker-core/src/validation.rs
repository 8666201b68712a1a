//! Field validators for bug payloads.
//!
//! Validators operate on raw JSON values so that a missing field, a field of
//! the wrong type, and a field with an out-of-range value each produce their
//! own message. They never mutate input and never fail early: callers get
//! every failing message in a fixed field order.

use serde::Serialize;
use serde_json::Value;

use crate::{BugError, BugPriority, BugStatus};

pub const TITLE_MAX_CHARS: usize = 200;
pub const REPORTER_MAX_CHARS: usize = 100;

const OPTIONAL_TEXT_FIELDS: [&str; 5] = [
    "assignedTo",
    "stepsToReproduce",
    "expectedBehavior",
    "actualBehavior",
    "environment",
];
const TEXT_LIST_FIELDS: [&str; 2] = ["tags", "attachments"];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub type FieldResult = Result<(), FieldError>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }
}

impl ValidationReport {
    fn check(&mut self, result: FieldResult) {
        if let Err(err) = result {
            self.is_valid = false;
            self.errors.push(err.message);
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![message.into()],
        }
    }

    /// # Errors
    /// Returns [`BugError::Validation`] carrying every collected message.
    pub fn into_result(self) -> Result<(), BugError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(BugError::Validation(self.errors))
        }
    }
}

/// JSON truthiness: `null`, `false`, `0` and `""` are falsy.
#[must_use]
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

fn required_text(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text.as_str()),
        _ => None,
    }
}

fn allowed_list(names: impl IntoIterator<Item = &'static str>) -> String {
    names.into_iter().collect::<Vec<_>>().join(", ")
}

/// # Errors
/// Returns a [`FieldError`] when the title is missing, not text, holds a NUL,
/// is blank, or is longer than [`TITLE_MAX_CHARS`] after trimming.
pub fn validate_title(value: Option<&Value>) -> FieldResult {
    let Some(title) = required_text(value) else {
        return Err(FieldError::new("title", "Title is required and must be a string"));
    };

    if title.contains('\0') {
        return Err(FieldError::new("title", "Title cannot contain null characters"));
    }

    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(FieldError::new("title", "Title cannot be empty"));
    }

    if trimmed.chars().count() > TITLE_MAX_CHARS {
        return Err(FieldError::new(
            "title",
            format!("Title cannot exceed {TITLE_MAX_CHARS} characters"),
        ));
    }

    Ok(())
}

/// # Errors
/// Returns a [`FieldError`] when the description is missing, not text, holds
/// a NUL, or is blank.
pub fn validate_description(value: Option<&Value>) -> FieldResult {
    let Some(description) = required_text(value) else {
        return Err(FieldError::new(
            "description",
            "Description is required and must be a string",
        ));
    };

    if description.contains('\0') {
        return Err(FieldError::new(
            "description",
            "Description cannot contain null characters",
        ));
    }

    if description.trim().is_empty() {
        return Err(FieldError::new("description", "Description cannot be empty"));
    }

    Ok(())
}

/// # Errors
/// Returns a [`FieldError`] listing the allowed statuses when the value is
/// missing, not text, or unknown.
pub fn validate_status(value: Option<&Value>) -> FieldResult {
    let Some(status) = required_text(value) else {
        return Err(FieldError::new("status", "Status is required and must be a string"));
    };

    if BugStatus::parse(status).is_none() {
        return Err(FieldError::new(
            "status",
            format!(
                "Status must be one of: {}",
                allowed_list(BugStatus::ALL.map(BugStatus::as_str))
            ),
        ));
    }

    Ok(())
}

/// Priority is optional: a missing or falsy value passes.
///
/// # Errors
/// Returns a [`FieldError`] when a supplied value is not text or is unknown.
pub fn validate_priority(value: Option<&Value>) -> FieldResult {
    if !is_truthy(value) {
        return Ok(());
    }

    let Some(Value::String(priority)) = value else {
        return Err(FieldError::new("priority", "Priority must be a string"));
    };

    if BugPriority::parse(priority).is_none() {
        return Err(FieldError::new(
            "priority",
            format!(
                "Priority must be one of: {}",
                allowed_list(BugPriority::ALL.map(BugPriority::as_str))
            ),
        ));
    }

    Ok(())
}

/// # Errors
/// Returns a [`FieldError`] when the reporter is missing, not text, holds a
/// NUL, is blank, or is longer than [`REPORTER_MAX_CHARS`] after trimming.
pub fn validate_reporter(value: Option<&Value>) -> FieldResult {
    let Some(reporter) = required_text(value) else {
        return Err(FieldError::new(
            "reporter",
            "Reporter is required and must be a string",
        ));
    };

    if reporter.contains('\0') {
        return Err(FieldError::new(
            "reporter",
            "Reporter name cannot contain null characters",
        ));
    }

    let trimmed = reporter.trim();
    if trimmed.is_empty() {
        return Err(FieldError::new("reporter", "Reporter name cannot be empty"));
    }

    if trimmed.chars().count() > REPORTER_MAX_CHARS {
        return Err(FieldError::new(
            "reporter",
            format!("Reporter name cannot exceed {REPORTER_MAX_CHARS} characters"),
        ));
    }

    Ok(())
}

fn validate_optional_text(field: &'static str, value: Option<&Value>) -> FieldResult {
    match value {
        None | Some(Value::Null | Value::String(_)) => Ok(()),
        Some(_) => Err(FieldError::new(field, format!("{field} must be a string"))),
    }
}

fn validate_text_list(field: &'static str, value: Option<&Value>) -> FieldResult {
    match value {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(FieldError::new(
            field,
            format!("{field} must be an array of strings"),
        )),
    }
}

fn check_auxiliary_fields(report: &mut ValidationReport, body: &Value) {
    for field in OPTIONAL_TEXT_FIELDS {
        report.check(validate_optional_text(field, body.get(field)));
    }
    for field in TEXT_LIST_FIELDS {
        report.check(validate_text_list(field, body.get(field)));
    }
}

/// Aggregate check over a candidate bug.
///
/// Title and description are always checked; status, priority and reporter
/// only when the candidate supplies a truthy value for them.
#[must_use]
pub fn validate_bug(body: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.check(validate_title(body.get("title")));
    report.check(validate_description(body.get("description")));

    if is_truthy(body.get("status")) {
        report.check(validate_status(body.get("status")));
    }
    if is_truthy(body.get("priority")) {
        report.check(validate_priority(body.get("priority")));
    }
    if is_truthy(body.get("reporter")) {
        report.check(validate_reporter(body.get("reporter")));
    }

    report
}

/// Gate for inserts: [`validate_bug`] plus the record-level requirements
/// (reporter present, auxiliary fields well-typed).
#[must_use]
pub fn validate_new_bug(body: &Value) -> ValidationReport {
    if !body.is_object() {
        return ValidationReport::reject("Request body must be a JSON object");
    }

    let mut report = validate_bug(body);
    if !is_truthy(body.get("reporter")) {
        report.check(validate_reporter(body.get("reporter")));
    }
    check_auxiliary_fields(&mut report, body);
    report
}

/// Gate for partial updates: each field that is present (and not `null`) is
/// checked with its own validator; absent fields are left alone.
#[must_use]
pub fn validate_bug_update(body: &Value) -> ValidationReport {
    if !body.is_object() {
        return ValidationReport::reject("Request body must be a JSON object");
    }

    let present = |field: &str| body.get(field).filter(|value| !value.is_null());
    let mut report = ValidationReport::default();

    if let Some(value) = present("title") {
        report.check(validate_title(Some(value)));
    }
    if let Some(value) = present("description") {
        report.check(validate_description(Some(value)));
    }
    if let Some(value) = present("status") {
        report.check(validate_status(Some(value)));
    }
    if let Some(value) = present("priority") {
        report.check(validate_priority(Some(value)));
    }
    if let Some(value) = present("reporter") {
        report.check(validate_reporter(Some(value)));
    }
    check_auxiliary_fields(&mut report, body);

    report
}
