//! Parameter normalization
//!
//! Callers hand the engine params and context in two shapes: a JSON object
//! or a list of `[key, value]` pairs. Both normalize into the canonical
//! [`Params`] mapping; anything else is a validation error. Normalization
//! never touches values, only the container.

use serde_json::Value;

use crate::error::ExecError;

/// Canonical mapping used for params, context data, results, and error
/// details.
pub type Params = serde_json::Map<String, Value>;

/// Normalize caller-supplied input into a [`Params`] map.
///
/// Accepted shapes:
/// - `null`: empty map
/// - object: used as-is
/// - array of `[key, value]` pairs with string keys (keyword-list form);
///   later pairs win on duplicate keys
pub fn normalize(input: Value) -> Result<Params, ExecError> {
    match input {
        Value::Null => Ok(Params::new()),
        Value::Object(map) => Ok(map),
        Value::Array(pairs) => from_pairs(pairs),
        other => Err(ExecError::validation("params must be a map or a list of key-value pairs")
            .with_detail("got", type_name(&other))),
    }
}

fn from_pairs(pairs: Vec<Value>) -> Result<Params, ExecError> {
    let mut map = Params::new();
    for pair in pairs {
        match pair {
            Value::Array(mut kv) if kv.len() == 2 => {
                let value = kv.pop().expect("len checked");
                let key = kv.pop().expect("len checked");
                match key {
                    Value::String(key) => {
                        map.insert(key, value);
                    }
                    other => {
                        return Err(ExecError::validation("pair key must be a string")
                            .with_detail("got", type_name(&other)));
                    }
                }
            }
            other => {
                return Err(ExecError::validation(
                    "params list entries must be [key, value] pairs",
                )
                .with_detail("got", type_name(&other)));
            }
        }
    }
    Ok(map)
}

/// Merge `from` into `into`; keys in `from` win.
pub fn merge(into: &mut Params, from: &Params) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

/// Merged copy, `overlay` keys winning.
pub fn merged(base: &Params, overlay: &Params) -> Params {
    let mut out = base.clone();
    merge(&mut out, overlay);
    out
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
