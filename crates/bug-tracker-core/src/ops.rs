//! Request-level operations shared by every front end.
//!
//! Each operation validates first, then touches the store, and reports a
//! missing record as [`BugError::NotFound`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::{is_truthy, validate_priority, validate_status, FieldResult};
use crate::{
    Bug, BugError, BugId, BugPatch, BugPriority, BugQuery, BugStatus, BugStore, NewBug,
    Pagination, SortField, SortOrder, MAX_LIMIT,
};

/// Raw list parameters as they arrive on a query string.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

impl ListParams {
    /// Parses the raw parameters, applying defaults for blank values.
    ///
    /// # Errors
    /// Returns [`BugError::Validation`] listing every malformed parameter.
    pub fn to_query(&self) -> Result<BugQuery, BugError> {
        let mut query = BugQuery::default();
        let mut errors = Vec::new();

        if let Some(raw) = provided(self.status.as_deref()) {
            match BugStatus::parse(raw) {
                Some(status) => query.status = Some(status),
                None => push_filter_error(&mut errors, raw, validate_status),
            }
        }

        if let Some(raw) = provided(self.priority.as_deref()) {
            match BugPriority::parse(raw) {
                Some(priority) => query.priority = Some(priority),
                None => push_filter_error(&mut errors, raw, validate_priority),
            }
        }

        if let Some(raw) = provided(self.page.as_deref()) {
            match raw.parse::<u32>() {
                Ok(page) if page >= 1 => query.page = page,
                _ => errors.push("page must be a positive integer".to_string()),
            }
        }

        if let Some(raw) = provided(self.limit.as_deref()) {
            match raw.parse::<u32>() {
                Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => query.limit = limit,
                _ => errors.push(format!("limit must be an integer between 1 and {MAX_LIMIT}")),
            }
        }

        if let Some(raw) = provided(self.sort_by.as_deref()) {
            match SortField::parse(raw) {
                Some(field) => query.sort_by = field,
                None => errors.push(format!(
                    "sortBy must be one of: {}",
                    SortField::ALL.map(SortField::as_str).join(", ")
                )),
            }
        }

        if let Some(raw) = provided(self.order.as_deref()) {
            match SortOrder::parse(raw) {
                Some(order) => query.order = order,
                None => errors.push("order must be one of: asc, desc".to_string()),
            }
        }

        if errors.is_empty() {
            Ok(query)
        } else {
            Err(BugError::Validation(errors))
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BugList {
    pub bugs: Vec<Bug>,
    pub pagination: Pagination,
}

fn provided(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn push_filter_error(
    errors: &mut Vec<String>,
    raw: &str,
    validate: impl FnOnce(Option<&Value>) -> FieldResult,
) {
    if let Err(err) = validate(Some(&Value::String(raw.to_string()))) {
        errors.push(err.message);
    }
}

/// # Errors
/// Returns [`BugError::Validation`] for rejected bodies and store errors as-is.
pub fn create_bug<S: BugStore + ?Sized>(store: &mut S, body: &Value) -> Result<Bug, BugError> {
    let input = NewBug::from_json(body)?;
    store.create(&input)
}

/// # Errors
/// Returns [`BugError::Format`] for malformed ids and [`BugError::NotFound`]
/// when no record matches.
pub fn get_bug<S: BugStore + ?Sized>(store: &S, raw_id: &str) -> Result<Bug, BugError> {
    let id = BugId::parse(raw_id)?;
    store.find_by_id(id)?.ok_or(BugError::NotFound)
}

/// # Errors
/// Returns [`BugError::Validation`] for malformed list parameters.
pub fn list_bugs<S: BugStore + ?Sized>(store: &S, params: &ListParams) -> Result<BugList, BugError> {
    let query = params.to_query()?;
    let page = store.find_many(&query)?;
    Ok(BugList {
        pagination: Pagination::new(&query, page.total),
        bugs: page.bugs,
    })
}

/// Applies a partial update. The body is validated before the id is parsed.
///
/// # Errors
/// Returns [`BugError::Validation`], [`BugError::Format`] or
/// [`BugError::NotFound`].
pub fn update_bug<S: BugStore + ?Sized>(
    store: &mut S,
    raw_id: &str,
    body: &Value,
) -> Result<Bug, BugError> {
    let patch = BugPatch::from_json(body)?;
    let id = BugId::parse(raw_id)?;
    store.update_by_id(id, &patch)?.ok_or(BugError::NotFound)
}

/// # Errors
/// Returns [`BugError::Validation`] when `status` is missing or unknown,
/// [`BugError::Format`] or [`BugError::NotFound`].
pub fn set_bug_status<S: BugStore + ?Sized>(
    store: &mut S,
    raw_id: &str,
    body: &Value,
) -> Result<Bug, BugError> {
    let value = body.get("status");
    if !is_truthy(value) {
        return Err(BugError::Validation(vec!["Status is required".to_string()]));
    }
    validate_status(value).map_err(|err| BugError::Validation(vec![err.message]))?;
    let status = value
        .and_then(Value::as_str)
        .and_then(BugStatus::parse)
        .ok_or_else(|| BugError::Validation(vec!["Status is required".to_string()]))?;

    let id = BugId::parse(raw_id)?;
    store
        .update_by_id(id, &BugPatch::status_only(status))?
        .ok_or(BugError::NotFound)
}

/// # Errors
/// Returns [`BugError::Format`] or [`BugError::NotFound`].
pub fn delete_bug<S: BugStore + ?Sized>(store: &mut S, raw_id: &str) -> Result<Bug, BugError> {
    let id = BugId::parse(raw_id)?;
    store.delete_by_id(id)?.ok_or(BugError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now_utc, BugPage};
    use serde_json::json;

    #[derive(Default)]
    struct MemoryStore {
        bugs: Vec<Bug>,
    }

    impl BugStore for MemoryStore {
        fn create(&mut self, input: &NewBug) -> Result<Bug, BugError> {
            let bug = Bug::from_new(BugId::new(), input, now_utc());
            self.bugs.push(bug.clone());
            Ok(bug)
        }

        fn find_by_id(&self, id: BugId) -> Result<Option<Bug>, BugError> {
            Ok(self.bugs.iter().find(|bug| bug.id == id).cloned())
        }

        fn find_many(&self, query: &BugQuery) -> Result<BugPage, BugError> {
            let matching: Vec<Bug> = self
                .bugs
                .iter()
                .filter(|bug| query.status.map_or(true, |status| bug.status == status))
                .filter(|bug| query.priority.map_or(true, |priority| bug.priority == priority))
                .cloned()
                .collect();
            let total = matching.len() as u64;
            let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
            let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
            Ok(BugPage {
                bugs: matching.into_iter().skip(offset).take(limit).collect(),
                total,
            })
        }

        fn update_by_id(&mut self, id: BugId, patch: &BugPatch) -> Result<Option<Bug>, BugError> {
            let Some(bug) = self.bugs.iter_mut().find(|bug| bug.id == id) else {
                return Ok(None);
            };
            bug.apply_patch(patch, now_utc());
            Ok(Some(bug.clone()))
        }

        fn delete_by_id(&mut self, id: BugId) -> Result<Option<Bug>, BugError> {
            let position = self.bugs.iter().position(|bug| bug.id == id);
            Ok(position.map(|index| self.bugs.remove(index)))
        }
    }

    fn must<T>(result: Result<T, BugError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn seeded_store() -> (MemoryStore, Bug) {
        let mut store = MemoryStore::default();
        let bug = must(create_bug(
            &mut store,
            &json!({
                "title": "Test Bug",
                "description": "This is a test bug description",
                "status": "open",
                "priority": "medium",
                "reporter": "Test User",
            }),
        ));
        (store, bug)
    }

    #[test]
    fn create_rejects_invalid_body_without_touching_store() {
        let mut store = MemoryStore::default();
        let result = create_bug(&mut store, &json!({ "description": "missing title" }));
        assert!(matches!(result, Err(BugError::Validation(_))));
        assert!(store.bugs.is_empty());
    }

    #[test]
    fn get_distinguishes_malformed_and_missing_ids() {
        let (store, bug) = seeded_store();
        assert_eq!(must(get_bug(&store, &bug.id.to_string())), bug);
        assert!(matches!(get_bug(&store, "invalid-id"), Err(BugError::Format(_))));
        assert_eq!(
            get_bug(&store, &BugId::new().to_string()),
            Err(BugError::NotFound)
        );
    }

    #[test]
    fn partial_update_leaves_other_fields_unchanged() {
        let (mut store, bug) = seeded_store();
        let updated = must(update_bug(
            &mut store,
            &bug.id.to_string(),
            &json!({ "status": "resolved" }),
        ));
        assert_eq!(updated.status, BugStatus::Resolved);
        assert_eq!(updated.title, "Test Bug");
        assert_eq!(updated.id, bug.id);
    }

    #[test]
    fn update_validates_before_parsing_id() {
        let (mut store, _) = seeded_store();
        let result = update_bug(&mut store, "invalid-id", &json!({ "status": "invalid-status" }));
        assert!(matches!(result, Err(BugError::Validation(_))));
        let result = update_bug(&mut store, "invalid-id", &json!({ "status": "closed" }));
        assert!(matches!(result, Err(BugError::Format(_))));
    }

    #[test]
    fn status_update_requires_a_known_status() {
        let (mut store, bug) = seeded_store();
        let id = bug.id.to_string();
        assert_eq!(
            set_bug_status(&mut store, &id, &json!({})),
            Err(BugError::Validation(vec!["Status is required".to_string()]))
        );
        assert!(matches!(
            set_bug_status(&mut store, &id, &json!({ "status": "done" })),
            Err(BugError::Validation(_))
        ));
        let updated = must(set_bug_status(&mut store, &id, &json!({ "status": "Closed" })));
        assert_eq!(updated.status, BugStatus::Closed);
        assert_eq!(
            set_bug_status(&mut store, &BugId::new().to_string(), &json!({ "status": "open" })),
            Err(BugError::NotFound)
        );
    }

    #[test]
    fn delete_returns_removed_record_once() {
        let (mut store, bug) = seeded_store();
        let id = bug.id.to_string();
        assert_eq!(must(delete_bug(&mut store, &id)), bug);
        assert_eq!(delete_bug(&mut store, &id), Err(BugError::NotFound));
    }

    #[test]
    fn list_params_apply_defaults_for_blank_values() {
        let params = ListParams {
            status: Some(String::new()),
            page: Some("  ".to_string()),
            ..ListParams::default()
        };
        assert_eq!(must(params.to_query()), BugQuery::default());
    }

    #[test]
    fn list_params_report_every_malformed_value() {
        let params = ListParams {
            status: Some("done".to_string()),
            priority: Some("urgent".to_string()),
            page: Some("0".to_string()),
            limit: Some("1000".to_string()),
            sort_by: Some("color".to_string()),
            order: Some("sideways".to_string()),
        };
        match params.to_query() {
            Err(BugError::Validation(errors)) => assert_eq!(errors.len(), 6),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn list_filter_errors_match_field_validators() {
        let params = ListParams {
            status: Some("done".to_string()),
            priority: Some("urgent".to_string()),
            ..ListParams::default()
        };
        match params.to_query() {
            Err(BugError::Validation(errors)) => assert_eq!(
                errors,
                vec![
                    "Status must be one of: open, in-progress, resolved, closed".to_string(),
                    "Priority must be one of: low, medium, high, critical".to_string(),
                ]
            ),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn list_reports_pagination_totals() {
        let (mut store, _) = seeded_store();
        for index in 0..14 {
            must(create_bug(
                &mut store,
                &json!({
                    "title": format!("Pagination Bug {index}"),
                    "description": format!("Description for bug {index}"),
                    "reporter": "Test User",
                }),
            ));
        }

        let params = ListParams {
            page: Some("2".to_string()),
            limit: Some("10".to_string()),
            ..ListParams::default()
        };
        let list = must(list_bugs(&store, &params));
        assert_eq!(list.bugs.len(), 5);
        assert_eq!(
            list.pagination,
            Pagination {
                page: 2,
                limit: 10,
                total: 15,
                pages: 2
            }
        );
    }
}
