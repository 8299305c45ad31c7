//! Payload rendering: turns any serializable value into the text shipped in a snippet

use serde::Serialize;
use serde_json::Value;

use crate::config::CaptureMethod;

/// Render `payload` with the configured capture method
pub fn render<P: Serialize + ?Sized>(payload: &P, method: CaptureMethod) -> String {
    let value = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => return format!("Payload could not be captured: {}", e),
    };

    let mut out = String::new();
    match method {
        CaptureMethod::Print => print_value(&replace_true_false_null(value), 0, &mut out),
        CaptureMethod::Dump => dump_value(&value, 0, &mut out),
    }
    out
}

/// Recursively replace booleans and null with their literal names.
///
/// The print style would otherwise render `false` and `null` as nothing.
pub fn replace_true_false_null(value: Value) -> Value {
    match value {
        Value::Bool(true) => Value::String("true".to_string()),
        Value::Bool(false) => Value::String("false".to_string()),
        Value::Null => Value::String("null".to_string()),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(replace_true_false_null).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, replace_true_false_null(v)))
                .collect(),
        ),
        other => other,
    }
}

fn entries(value: &Value) -> Option<Vec<(String, &Value)>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        ),
        Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
        _ => None,
    }
}

fn print_value(value: &Value, indent: usize, out: &mut String) {
    let Some(entries) = entries(value) else {
        match value {
            Value::String(s) => out.push_str(s),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(if *b { "1" } else { "" }),
            _ => {}
        }
        return;
    };

    let pad = " ".repeat(indent);
    out.push_str("Array\n");
    out.push_str(&pad);
    out.push_str("(\n");
    for (key, item) in entries {
        out.push_str(&pad);
        out.push_str("    [");
        out.push_str(&key);
        out.push_str("] => ");
        print_value(item, indent + 8, out);
        out.push('\n');
    }
    out.push_str(&pad);
    out.push_str(")\n");
}

fn dump_value(value: &Value, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    out.push_str(&pad);

    match value {
        Value::Null => out.push_str("NULL\n"),
        Value::Bool(b) => out.push_str(&format!("bool({})\n", b)),
        Value::Number(n) if n.is_f64() => out.push_str(&format!("float({})\n", n)),
        Value::Number(n) => out.push_str(&format!("int({})\n", n)),
        Value::String(s) => out.push_str(&format!("string({}) \"{}\"\n", s.len(), s)),
        Value::Array(items) => {
            out.push_str(&format!("array({}) {{\n", items.len()));
            for (i, item) in items.iter().enumerate() {
                out.push_str(&format!("{}  [{}]=>\n", pad, i));
                dump_value(item, indent + 2, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
        Value::Object(map) => {
            out.push_str(&format!("array({}) {{\n", map.len()));
            for (key, item) in map {
                out.push_str(&format!("{}  [\"{}\"]=>\n", pad, key));
                dump_value(item, indent + 2, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
    }
}
