use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Format output as tables using the tabled crate.
///
/// Scalars of the result go into one Field/Value table. Instrument maps
/// (weights, expected returns, sector weights) and row lists (trades, stress
/// impacts, factor exposures) each get their own titled table. Nested result
/// blocks such as the pipeline's `optimization` are rendered recursively.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => {
                print_section(None, result);
                print_envelope_notes(map);
            }
            Some(Value::Array(rows)) => print_rows(None, rows),
            _ => print_section(None, map),
        },
        Value::Array(rows) => print_rows(None, rows),
        _ => println!("{}", value),
    }
}

fn print_section(title: Option<&str>, map: &Map<String, Value>) {
    let mut scalars = Builder::default();
    scalars.push_record(["Field", "Value"]);
    let mut has_scalars = false;
    let mut deferred: Vec<(&String, &Value)> = Vec::new();

    for (key, val) in map {
        if is_instrument_map(val) || is_row_list(val) || is_block(val) {
            deferred.push((key, val));
        } else {
            scalars.push_record([key.as_str(), &format_value(val)]);
            has_scalars = true;
        }
    }

    if has_scalars {
        if let Some(t) = title {
            println!("\n[{}]", t);
        }
        println!("{}", Table::from(scalars));
    }

    for (key, val) in deferred {
        let heading = match title {
            Some(t) => format!("{}.{}", t, key),
            None => key.clone(),
        };
        match val {
            Value::Array(rows) => print_rows(Some(&heading), rows),
            Value::Object(inner) if is_instrument_map(val) => print_instrument_map(&heading, inner),
            Value::Object(inner) => print_section(Some(&heading), inner),
            _ => {}
        }
    }
}

fn print_instrument_map(title: &str, map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Instrument", "Value"]);
    for (id, v) in map {
        builder.push_record([id.as_str(), &format_value(v)]);
    }
    println!("\n[{}]", title);
    println!("{}", Table::from(builder));
}

fn print_rows(title: Option<&str>, rows: &[Value]) {
    if let Some(t) = title {
        println!("\n[{}]", t);
    }
    if rows.is_empty() {
        println!("(empty)");
        return;
    }

    let Some(Value::Object(first)) = rows.first() else {
        for item in rows {
            println!("{}", format_value(item));
        }
        return;
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(&headers);
    for item in rows {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default())
                .collect();
            builder.push_record(row);
        }
    }
    println!("{}", Table::from(builder));
}

fn print_envelope_notes(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

/// `{ "AAPL": "0.25", ... }`: every value a decimal string or number.
fn is_instrument_map(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && map.values().all(|v| v.is_string() || v.is_number())
        }
        _ => false,
    }
}

fn is_row_list(value: &Value) -> bool {
    matches!(value, Value::Array(rows) if rows.first().map_or(false, Value::is_object))
}

fn is_block(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => arr.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
