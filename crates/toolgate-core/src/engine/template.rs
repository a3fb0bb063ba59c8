//! Step input placeholder resolution.
//!
//! Supported patterns inside string values of a step's input:
//! - `${steps.N.output}` — the whole raw output of step N
//! - `${steps.N.output.a.b}` — field path into step N's output
//!
//! A placeholder that is the entire string substitutes structurally (the
//! referenced JSON value replaces the string); embedded placeholders
//! render as text.

use std::collections::HashMap;

use serde_json::Value;

/// Resolve every placeholder in `input` against prior step outputs.
///
/// Returns a description of the unresolvable reference on failure.
pub(crate) fn resolve_input(
    input: &Value,
    outputs: &HashMap<u32, Value>,
) -> Result<Value, String> {
    match input {
        Value::String(s) => resolve_string(s, outputs),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_input(v, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| resolve_input(v, outputs).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, outputs: &HashMap<u32, Value>) -> Result<Value, String> {
    let re = regex::Regex::new(r"\$\{steps\.(\d+)\.output((?:\.[A-Za-z0-9_\-]+)*)\}").unwrap();

    // A placeholder spanning the whole string substitutes structurally
    if let Some(caps) = re.captures(s) {
        if caps.get(0).map(|m| m.as_str()) == Some(s) {
            return lookup(&caps, outputs);
        }
    }

    let mut out = String::new();
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let m = caps.get(0).unwrap();
        out.push_str(&s[last..m.start()]);
        let value = lookup(&caps, outputs)?;
        out.push_str(&render(&value));
        last = m.end();
    }

    if last == 0 {
        return Ok(Value::String(s.to_string()));
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn lookup(caps: &regex::Captures<'_>, outputs: &HashMap<u32, Value>) -> Result<Value, String> {
    let step: u32 = caps[1]
        .parse()
        .map_err(|_| format!("invalid step reference '{}'", &caps[0]))?;
    let mut value = outputs
        .get(&step)
        .ok_or_else(|| format!("step {} produced no output", step))?;

    for field in caps[2].split('.').filter(|f| !f.is_empty()) {
        value = value
            .get(field)
            .ok_or_else(|| format!("step {} output has no field '{}'", step, field))?;
    }
    Ok(value.clone())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
