//! Plist helpers shared by the IPC protocol and the trace format.
//!
//! Keywords may arrive as `Value::Keyword("key")` (elisp-style parser) or
//! `Value::Symbol(":key")` (default parser); both are accepted everywhere.

use lexpr::Value;

/// Keyword name of a value, without the leading colon.
fn keyword_name(value: &Value) -> Option<&str> {
    match value {
        Value::Keyword(k) => Some(&**k),
        Value::Symbol(s) => s.strip_prefix(':'),
        _ => None,
    }
}

/// Render a plist value as a bare string: keywords lose their colon,
/// booleans and null become `t`/`nil`.
fn atom_string(value: &Value) -> String {
    match value {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => v.strip_prefix(':').unwrap_or(v).to_string(),
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => bool_sexp(*b).to_string(),
        Value::Null | Value::Nil => "nil".to_string(),
        other => other.to_string(),
    }
}

/// Keyword heading a form such as `(:gaze :x 1 :y 2)`.
pub fn head_keyword(value: &Value) -> Option<String> {
    match value {
        Value::Cons(pair) => keyword_name(pair.car()).map(str::to_string),
        _ => None,
    }
}

/// All `(key, value)` pairs of a plist, in order. Keys and values are
/// expected to alternate.
pub fn plist_pairs(value: &Value) -> Vec<(String, String)> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }

    let mut pairs = Vec::new();
    let mut i = 0;
    while i + 1 < items.len() {
        match keyword_name(items[i]) {
            Some(key) => {
                pairs.push((key.to_string(), atom_string(items[i + 1])));
                i += 2;
            }
            None => i += 1,
        }
    }
    pairs
}

/// Extract a keyword value from an s-expression plist. Only key positions
/// are matched, so a value such as `:event` never shadows a later key.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let mut current = value;
    while let Value::Cons(pair) = current {
        let Value::Cons(next) = pair.cdr() else {
            return None;
        };
        if keyword_name(pair.car()) == Some(key) {
            return Some(atom_string(next.car()));
        }
        current = next.cdr();
    }
    None
}

/// Arguments of a form headed by a keyword: `(:gaze :x 1 :y 2)` yields
/// the plist `(:x 1 :y 2)`.
pub fn form_args(value: &Value) -> &Value {
    match value {
        Value::Cons(pair) => pair.cdr(),
        other => other,
    }
}

pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// `nil` is false, anything else true.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn bool_sexp(v: bool) -> &'static str {
    if v {
        "t"
    } else {
        "nil"
    }
}

pub fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

/// Successful response carrying extra plist fields (leading space included).
pub fn ok_response_with(id: i64, fields: &str) -> String {
    format!("(:type :response :id {} :status :ok{})", id, fields)
}

pub fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, String)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}
