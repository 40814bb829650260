use crate::error::{ControllerError, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

fn element_key(element: &Value) -> String {
    let field = |name: &str| element.get(name).and_then(Value::as_str).unwrap_or("");
    format!("{}/{}", field("namespace"), field("name"))
}

fn parse_elements(raw: &str) -> serde_json::Result<Vec<Value>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

/// Merge a freshly generated selection annotation over the current one.
///
/// The result holds exactly the elements of `new_raw`. An element whose
/// `namespace/name` also appears in `existing_raw` is merge-patched onto the
/// existing one, so fields Multus added after the fact survive. Repeated keys
/// pair up by occurrence order.
pub fn merge_selection(existing_raw: &str, new_raw: &str) -> Result<String> {
    let new_elements = parse_elements(new_raw).map_err(|e| {
        ControllerError::internal_error(format!("Generated network selection is invalid: {}", e))
    })?;

    let existing_elements = parse_elements(existing_raw).unwrap_or_else(|e| {
        warn!("Discarding malformed network-selection annotation: {}", e);
        Vec::new()
    });
    let mut existing_by_key: HashMap<String, Vec<Value>> = HashMap::new();
    for element in existing_elements.into_iter().rev() {
        existing_by_key.entry(element_key(&element)).or_default().push(element);
    }

    let merged: Vec<Value> = new_elements
        .into_iter()
        .map(|element| {
            match existing_by_key
                .get_mut(&element_key(&element))
                .and_then(Vec::pop)
            {
                Some(mut existing) => {
                    json_patch::merge(&mut existing, &element);
                    existing
                }
                None => element,
            }
        })
        .collect();

    if merged.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(&merged).map_err(|e| {
        ControllerError::internal_error(format!("Failed to encode merged selection: {}", e))
    })
}
