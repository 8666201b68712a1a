use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod ops;
pub mod validation;

pub use validation::{
    is_truthy, validate_bug, validate_bug_update, validate_description, validate_new_bug,
    validate_priority, validate_reporter, validate_status, validate_title, FieldError,
    ValidationReport,
};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BugError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("bug not found")]
    NotFound,
    #[error("invalid bug id format: {0}")]
    Format(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct BugId(pub Ulid);

impl BugId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a client-supplied identifier.
    ///
    /// # Errors
    /// Returns [`BugError::Format`] when `raw` is not a well-formed ULID.
    pub fn parse(raw: &str) -> Result<Self, BugError> {
        Ulid::from_string(raw.trim())
            .map(Self)
            .map_err(|_| BugError::Format(raw.to_string()))
    }
}

impl Default for BugId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BugId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BugStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl BugStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::InProgress, Self::Resolved, Self::Closed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Case-insensitive match against the allowed status names.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "in-progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BugPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl BugPriority {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    pub id: BugId,
    pub title: String,
    pub description: String,
    pub status: BugStatus,
    pub priority: BugPriority,
    pub reporter: String,
    pub assigned_to: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_to_reproduce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub attachments: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Bug {
    /// Materializes a stored record from a validated insert.
    #[must_use]
    pub fn from_new(id: BugId, input: &NewBug, now: OffsetDateTime) -> Self {
        Self {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            status: input.status,
            priority: input.priority,
            reporter: input.reporter.clone(),
            assigned_to: input.assigned_to.clone(),
            tags: input.tags.clone(),
            steps_to_reproduce: input.steps_to_reproduce.clone(),
            expected_behavior: input.expected_behavior.clone(),
            actual_behavior: input.actual_behavior.clone(),
            environment: input.environment.clone(),
            attachments: input.attachments.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies the supplied fields of `patch`; `id` and `created_at` never change.
    pub fn apply_patch(&mut self, patch: &BugPatch, now: OffsetDateTime) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(reporter) = &patch.reporter {
            self.reporter.clone_from(reporter);
        }
        if let Some(assigned_to) = &patch.assigned_to {
            self.assigned_to.clone_from(assigned_to);
        }
        if let Some(tags) = &patch.tags {
            self.tags.clone_from(tags);
        }
        patch_optional(&mut self.steps_to_reproduce, patch.steps_to_reproduce.as_deref());
        patch_optional(&mut self.expected_behavior, patch.expected_behavior.as_deref());
        patch_optional(&mut self.actual_behavior, patch.actual_behavior.as_deref());
        patch_optional(&mut self.environment, patch.environment.as_deref());
        if let Some(attachments) = &patch.attachments {
            self.attachments.clone_from(attachments);
        }
        self.updated_at = now;
    }
}

fn patch_optional(target: &mut Option<String>, value: Option<&str>) {
    match value {
        Some("") => *target = None,
        Some(text) => *target = Some(text.to_string()),
        None => {}
    }
}

/// A validated, normalized candidate for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBug {
    pub title: String,
    pub description: String,
    pub status: BugStatus,
    pub priority: BugPriority,
    pub reporter: String,
    pub assigned_to: String,
    pub tags: Vec<String>,
    pub steps_to_reproduce: Option<String>,
    pub expected_behavior: Option<String>,
    pub actual_behavior: Option<String>,
    pub environment: Option<String>,
    pub attachments: Vec<String>,
}

impl NewBug {
    /// Gates a raw create body through [`validate_new_bug`] and normalizes it.
    ///
    /// # Errors
    /// Returns [`BugError::Validation`] with every failing message.
    pub fn from_json(body: &Value) -> Result<Self, BugError> {
        validate_new_bug(body).into_result()?;

        Ok(Self {
            title: trimmed_text(body, "title").unwrap_or_default(),
            description: trimmed_text(body, "description").unwrap_or_default(),
            status: non_empty_text(body, "status")
                .and_then(BugStatus::parse)
                .unwrap_or_default(),
            priority: non_empty_text(body, "priority")
                .and_then(BugPriority::parse)
                .unwrap_or_default(),
            reporter: trimmed_text(body, "reporter").unwrap_or_default(),
            assigned_to: trimmed_text(body, "assignedTo").unwrap_or_default(),
            tags: string_list(body, "tags").unwrap_or_default(),
            steps_to_reproduce: optional_text(body, "stepsToReproduce"),
            expected_behavior: optional_text(body, "expectedBehavior"),
            actual_behavior: optional_text(body, "actualBehavior"),
            environment: optional_text(body, "environment"),
            attachments: string_list(body, "attachments").unwrap_or_default(),
        })
    }
}

/// A validated partial update. `None` leaves the stored value unchanged;
/// an empty string clears one of the optional long-text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BugPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<BugStatus>,
    pub priority: Option<BugPriority>,
    pub reporter: Option<String>,
    pub assigned_to: Option<String>,
    pub tags: Option<Vec<String>>,
    pub steps_to_reproduce: Option<String>,
    pub expected_behavior: Option<String>,
    pub actual_behavior: Option<String>,
    pub environment: Option<String>,
    pub attachments: Option<Vec<String>>,
}

impl BugPatch {
    /// Gates a raw update body through [`validate_bug_update`] and normalizes it.
    ///
    /// # Errors
    /// Returns [`BugError::Validation`] with every failing message.
    pub fn from_json(body: &Value) -> Result<Self, BugError> {
        validate_bug_update(body).into_result()?;

        Ok(Self {
            title: trimmed_text(body, "title"),
            description: trimmed_text(body, "description"),
            status: non_empty_text(body, "status").and_then(BugStatus::parse),
            priority: non_empty_text(body, "priority").and_then(BugPriority::parse),
            reporter: trimmed_text(body, "reporter"),
            assigned_to: trimmed_text(body, "assignedTo"),
            tags: string_list(body, "tags"),
            steps_to_reproduce: trimmed_text(body, "stepsToReproduce"),
            expected_behavior: trimmed_text(body, "expectedBehavior"),
            actual_behavior: trimmed_text(body, "actualBehavior"),
            environment: trimmed_text(body, "environment"),
            attachments: string_list(body, "attachments"),
        })
    }

    #[must_use]
    pub fn status_only(status: BugStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    Status,
    Priority,
    Reporter,
}

impl SortField {
    pub const ALL: [Self; 6] = [
        Self::CreatedAt,
        Self::UpdatedAt,
        Self::Title,
        Self::Status,
        Self::Priority,
        Self::Reporter,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Title => "title",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Reporter => "reporter",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BugQuery {
    pub status: Option<BugStatus>,
    pub priority: Option<BugPriority>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl Default for BugQuery {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            sort_by: SortField::default(),
            order: SortOrder::default(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl BugQuery {
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugPage {
    pub bugs: Vec<Bug>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    #[must_use]
    pub fn new(query: &BugQuery, total: u64) -> Self {
        let limit = u64::from(query.limit.max(1));
        Self {
            page: query.page,
            limit: query.limit,
            total,
            pages: total.div_ceil(limit),
        }
    }
}

/// Persistence boundary for bug records.
///
/// Implementations trust inputs that came through [`NewBug::from_json`] or
/// [`BugPatch::from_json`] and only enforce their own storage constraints.
pub trait BugStore {
    /// # Errors
    /// Returns [`BugError::Constraint`] when storage constraints reject the record.
    fn create(&mut self, input: &NewBug) -> Result<Bug, BugError>;

    /// # Errors
    /// Returns [`BugError::Storage`] when the lookup itself fails.
    fn find_by_id(&self, id: BugId) -> Result<Option<Bug>, BugError>;

    /// # Errors
    /// Returns [`BugError::Storage`] when the query fails.
    fn find_many(&self, query: &BugQuery) -> Result<BugPage, BugError>;

    /// # Errors
    /// Returns [`BugError::Constraint`] when storage constraints reject the update.
    fn update_by_id(&mut self, id: BugId, patch: &BugPatch) -> Result<Option<Bug>, BugError>;

    /// # Errors
    /// Returns [`BugError::Storage`] when the delete fails.
    fn delete_by_id(&mut self, id: BugId) -> Result<Option<Bug>, BugError>;
}

/// Parses an RFC3339 timestamp and normalizes it to UTC.
///
/// # Errors
/// Returns [`BugError::Storage`] when parsing fails.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, BugError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| BugError::Storage(format!("invalid RFC3339 timestamp {value}: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`BugError::Storage`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, BugError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| BugError::Storage(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

fn non_empty_text<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

fn trimmed_text(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
}

fn optional_text(body: &Value, key: &str) -> Option<String> {
    trimmed_text(body, key).filter(|text| !text.is_empty())
}

fn string_list(body: &Value, key: &str) -> Option<Vec<String>> {
    let items = body.get(key)?.as_array()?;
    let mut values: Vec<String> = Vec::with_capacity(items.len());
    for item in items.iter().filter_map(Value::as_str) {
        let trimmed = item.trim();
        if !trimmed.is_empty() && !values.iter().any(|existing| existing == trimmed) {
            values.push(trimmed.to_string());
        }
    }
    Some(values)
}
