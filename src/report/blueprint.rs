//! Access helpers for the embedded report blueprint.
//!
//! The blueprint is a fixed hierarchical template; the assembler writes
//! into well-known key paths. Lookups are defensive: a missing slot is a
//! structured warning, never a panic.

use serde_json::Value;

use super::ReportError;

const BLUEPRINT_JSON: &str = include_str!("../../assets/report_blueprint.json");

pub fn load() -> Result<Value, ReportError> {
    serde_json::from_str(BLUEPRINT_JSON).map_err(|e| ReportError::Blueprint(e.to_string()))
}

/// Mutable access to a nested object path. `None` (with a warning) when
/// any segment is missing.
pub fn get_path_mut<'a>(root: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path {
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => {
                tracing::warn!(path = %path.join("."), segment = %segment, "blueprint slot missing");
                return None;
            }
        }
    }
    Some(current)
}

pub fn set_value(root: &mut Value, path: &[&str], value: Value) {
    if let Some(slot) = get_path_mut(root, path) {
        *slot = value;
    }
}

pub fn set_string(root: &mut Value, path: &[&str], value: &str) {
    set_value(root, path, Value::String(value.to_string()));
}

/// Replaces the `rows` array of a table slot.
pub fn set_rows(root: &mut Value, table_path: &[&str], rows: Vec<Value>) {
    if let Some(table) = get_path_mut(root, table_path) {
        table["rows"] = Value::Array(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blueprint_parses_and_has_expected_chapters() {
        let report = load().unwrap();
        assert!(report["bsiAuditReport"]["allgemeines"].is_object());
        assert!(report["bsiAuditReport"]["dokumentenpruefung"].is_object());
        assert!(report["bsiAuditReport"]["erstellungEinesPruefplans"].is_object());
        assert!(report["bsiAuditReport"]["vorOrtAudit"].is_object());
        assert!(report["bsiAuditReport"]["anhang"].is_object());
    }

    #[test]
    fn get_path_mut_returns_none_for_missing_slot() {
        let mut value = json!({ "a": { "b": 1 } });
        assert!(get_path_mut(&mut value, &["a", "b"]).is_some());
        assert!(get_path_mut(&mut value, &["a", "x"]).is_none());
        assert!(get_path_mut(&mut value, &["a", "b", "c"]).is_none());
    }

    #[test]
    fn set_rows_replaces_table_rows() {
        let mut value = json!({ "t": { "table": { "rows": [1, 2] } } });
        set_rows(&mut value, &["t", "table"], vec![json!(3)]);
        assert_eq!(value["t"]["table"]["rows"], json!([3]));
    }

    #[test]
    fn set_value_on_missing_path_is_a_noop() {
        let mut value = json!({ "a": 1 });
        set_value(&mut value, &["missing", "slot"], json!(2));
        assert_eq!(value, json!({ "a": 1 }));
    }
}
