use serde_json::Value;

/// Render keyed or tabular input (JSON, or CSV with a header row) as one
/// natural-language sentence per leaf, keyed by its dotted path.
///
/// Returns `None` when the input is neither, so the caller can fall back to
/// plain-text splitting of the raw content.
pub fn render_tabular(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            let mut leaves = Vec::new();
            flatten_value("", &value, &mut leaves);
            return render_sentences(leaves);
        }
        return None;
    }

    render_csv(trimmed)
}

/// Flatten nested JSON into `(dotted.path, value)` pairs in document order.
pub fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_value(&join_path(prefix, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_value(&join_path(prefix, &i.to_string()), child, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf_text(leaf))),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => "empty".to_string(),
        Value::Object(_) | Value::Array(_) => "empty".to_string(),
        other => other.to_string(),
    }
}

fn render_csv(raw: &str) -> Option<String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let headers = reader.headers().ok()?.clone();
    if headers.len() < 2 {
        return None;
    }

    let mut leaves = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.ok()?;
        for (header, field) in headers.iter().zip(record.iter()) {
            let value = if field.is_empty() { "empty" } else { field };
            leaves.push((format!("{}.{}", row, header), value.to_string()));
        }
    }

    render_sentences(leaves)
}

fn render_sentences(leaves: Vec<(String, String)>) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }

    let sentences: Vec<String> = leaves
        .into_iter()
        .map(|(path, value)| {
            let path = if path.is_empty() { "value".to_string() } else { path };
            format!("{} is {}.", path, value.trim_end_matches('.'))
        })
        .collect();

    Some(sentences.join("\n"))
}
