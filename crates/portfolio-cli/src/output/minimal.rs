use serde_json::Value;

/// Print just the key answer from the output.
///
/// Looks for well-known result fields in order of priority, descending into
/// a nested `optimization` block (pipeline output), then falls back to the
/// first field in the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let result_obj = result_obj
        .as_object()
        .and_then(|m| m.get("optimization"))
        .unwrap_or(result_obj);

    let priority_keys = [
        "weights",
        "expected_returns",
        "ex_ante_volatility",
        "x",
        "values",
    ];

    if let Value::Object(map) = result_obj {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        // instrument -> value maps print one "id value" pair per line
        Value::Object(map) if map.values().all(|v| v.is_string() || v.is_number()) => map
            .iter()
            .map(|(k, v)| format!("{} {}", k, format_minimal(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
