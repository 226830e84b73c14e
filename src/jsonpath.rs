//! Minimal dotted JSON path lookup: `$.a.b[0].name`, `a.b`, `$.items[2]`.
//!
//! Only member access and numeric indexing are supported. Used by TCP
//! read assertions and by load-test variable extraction.

use serde_json::Value;

/// Resolve `path` inside `doc`. A JSON `null` at the end of the path counts
/// as absent.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let trimmed = trimmed.trim_start_matches('.');

    let mut cur = doc;
    for segment in trimmed.split('.').filter(|s| !s.is_empty()) {
        let (name, indexes) = split_segment(segment)?;
        if !name.is_empty() {
            cur = cur.as_object()?.get(name)?;
        }
        for idx in indexes {
            cur = cur.as_array()?.get(idx)?;
        }
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// Parse `bytes` as JSON and resolve `path`, rendering the hit as text.
pub fn extract(bytes: &[u8], path: &str) -> Option<String> {
    let doc: Value = serde_json::from_slice(bytes).ok()?;
    lookup(&doc, path).map(render)
}

/// Strings render bare, everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn split_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let name = &segment[..open];
    let mut indexes = Vec::new();
    let mut rest = &segment[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indexes.push(inner[..close].trim().parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((name, indexes))
}
