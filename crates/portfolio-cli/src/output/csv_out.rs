use serde_json::{Map, Value};
use std::io;

type StdoutWriter<'a> = csv::Writer<io::StdoutLock<'a>>;

/// Write output as CSV to stdout.
///
/// Optimizer and pipeline results print the target portfolio as
/// `instrument,previous_weight,target_weight,delta,side` from the trade list
/// (or `instrument,weight` when no trades are present). Row-list results
/// such as stress impacts print one row per entry; anything else falls back
/// to `field,value`.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => write_result(&mut wtr, result),
            Some(Value::Array(rows)) => write_rows(&mut wtr, rows),
            _ => write_fields(&mut wtr, map),
        },
        Value::Array(rows) => write_rows(&mut wtr, rows),
        _ => {
            let _ = wtr.write_record([&format_csv_value(value)]);
        }
    }

    let _ = wtr.flush();
}

fn write_result(wtr: &mut StdoutWriter<'_>, result: &Map<String, Value>) {
    let result = match result.get("optimization") {
        Some(Value::Object(opt)) => opt,
        _ => result,
    };

    if let Some(Value::Array(trades)) = result.get("trades") {
        if !trades.is_empty() {
            write_rows(wtr, trades);
            return;
        }
    }
    if let Some(Value::Object(weights)) = result.get("weights") {
        let _ = wtr.write_record(["instrument", "weight"]);
        for (id, w) in weights {
            let _ = wtr.write_record([id.as_str(), &format_csv_value(w)]);
        }
        return;
    }
    if let Some(Value::Object(mu)) = result.get("expected_returns") {
        let _ = wtr.write_record(["instrument", "expected_return"]);
        for (id, r) in mu {
            let _ = wtr.write_record([id.as_str(), &format_csv_value(r)]);
        }
        return;
    }
    write_fields(wtr, result);
}

fn write_fields(wtr: &mut StdoutWriter<'_>, map: &Map<String, Value>) {
    let _ = wtr.write_record(["field", "value"]);
    for (key, val) in map {
        let _ = wtr.write_record([key.as_str(), &format_csv_value(val)]);
    }
}

fn write_rows(wtr: &mut StdoutWriter<'_>, rows: &[Value]) {
    let Some(Value::Object(first)) = rows.first() else {
        for item in rows {
            let _ = wtr.write_record([&format_csv_value(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);
    for item in rows {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(*h).map(format_csv_value).unwrap_or_default())
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
