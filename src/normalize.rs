//! Adapters from raw endpoint payloads to [`Page`] and [`Resource`].
//!
//! List endpoints answer in one of three shapes:
//!
//! | Shape                                                  | Result                  |
//! |--------------------------------------------------------|-------------------------|
//! | `{ data: [..], currentPage, totalPages, total }`       | paginated page          |
//! | `{ data: { data: [..], currentPage, totalPages } }`    | paginated page          |
//! | `[..]`                                                 | single page             |
//!
//! A page without `currentPage`/`totalPages` is a single, non-paginated page.
//! Nothing past this module sees raw payloads.

use crate::error::{Error, Result};
use crate::paginate::Page;
use crate::resource::Resource;
use serde_json::{Map, Value};

/// Normalize a list response.
///
/// # Errors
/// Returns `Error::DeserializationError` if no item array can be found.
pub fn normalize_list_response(raw: Value) -> Result<Page<Resource>> {
    match raw {
        Value::Array(items) => Ok(Page::single(into_resources(items))),
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => Ok(paged(into_resources(items), &envelope)),
            Some(Value::Object(mut inner)) => match inner.remove("data") {
                Some(Value::Array(items)) => {
                    // Pagination fields may sit on either level.
                    let fields = if has_pagination(&inner) { &inner } else { &envelope };
                    Ok(paged(into_resources(items), fields))
                }
                _ => Err(shape_error("data.data")),
            },
            _ => Err(shape_error("data")),
        },
        _ => Err(shape_error("body")),
    }
}

/// Normalize an item response.
///
/// # Errors
/// Returns `Error::NotFound` for an empty `data` array or a null body.
pub fn normalize_item_response(raw: Value) -> Result<Resource> {
    let body = match raw {
        Value::Object(mut envelope) if envelope.contains_key("data") => {
            envelope.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    match body {
        Value::Array(items) => items
            .into_iter()
            .next()
            .map(Resource::new)
            .ok_or_else(|| Error::NotFound("empty item response".to_string())),
        Value::Null => Err(Error::NotFound("empty item response".to_string())),
        value => Ok(Resource::new(value)),
    }
}

fn into_resources(items: Vec<Value>) -> Vec<Resource> {
    items.into_iter().map(Resource::new).collect()
}

fn has_pagination(fields: &Map<String, Value>) -> bool {
    fields.contains_key("currentPage") || fields.contains_key("totalPages")
}

fn paged(items: Vec<Resource>, fields: &Map<String, Value>) -> Page<Resource> {
    let current = number(fields.get("currentPage"));
    let total_pages = number(fields.get("totalPages"));

    let page = match (current, total_pages) {
        (Some(current), Some(total_pages)) => Page::new(
            items,
            u32::try_from(current).unwrap_or(u32::MAX),
            u32::try_from(total_pages).unwrap_or(u32::MAX),
        ),
        _ => Page::single(items),
    };

    match number(fields.get("total")) {
        Some(total) => page.with_total(total),
        None => page,
    }
}

/// Accepts `3` and `"3"`; some endpoints stringify their counters.
fn number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn shape_error(at: &str) -> Error {
    Error::DeserializationError(format!("unrecognized list response: no item array at {}", at))
}
