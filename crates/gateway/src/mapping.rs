use serde_json::Value;

/// Whether a live index mapping satisfies the requested one.
///
/// Clusters decorate stored mappings with defaults, so this is a subset
/// check: every key of `requested` must be present in `live` with a matching
/// value. Scalars compare by value, with `"true"` and `true` treated alike.
pub fn mapping_matches(requested: &Value, live: &Value) -> bool {
    match (requested, live) {
        (Value::Object(requested), Value::Object(live)) => requested.iter().all(|(key, value)| {
            live.get(key)
                .is_some_and(|live_value| mapping_matches(value, live_value))
        }),
        (Value::Array(requested), Value::Array(live)) => {
            requested.len() == live.len()
                && requested
                    .iter()
                    .zip(live)
                    .all(|(requested, live)| mapping_matches(requested, live))
        }
        (requested, live) => requested == live || scalar_text(requested) == scalar_text(live),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
