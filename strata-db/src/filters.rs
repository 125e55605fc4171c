//! Value filter registry
//!
//! Named bidirectional transforms applied per attribute: in declared order
//! on write (encode), in reverse order on read (decode). Registration is
//! process-wide or per engine instance; duplicate names fail either way.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use strata_core::{format_datetime, parse_datetime, StrataError, StrataResult, Value};

type TransformFn = Arc<dyn Fn(Value) -> StrataResult<Value> + Send + Sync>;

/// A named bidirectional value transform.
#[derive(Clone)]
pub struct ValueFilter {
    encode: TransformFn,
    decode: TransformFn,
}

impl ValueFilter {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(Value) -> StrataResult<Value> + Send + Sync + 'static,
        D: Fn(Value) -> StrataResult<Value> + Send + Sync + 'static,
    {
        ValueFilter {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn encode(&self, value: Value) -> StrataResult<Value> {
        (self.encode)(value)
    }

    pub fn decode(&self, value: Value) -> StrataResult<Value> {
        (self.decode)(value)
    }
}

static GLOBAL_FILTERS: Lazy<RwLock<HashMap<String, ValueFilter>>> =
    Lazy::new(|| RwLock::new(builtin_filters()));

/// Serialize on write, parse (and re-lift nested documents) on read.
/// Structured input on decode passes through: jsonb-backed storage hands
/// the engine parsed values already.
fn json_filter() -> ValueFilter {
    ValueFilter::new(
        |value| match value {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_json().to_string())),
        },
        |value| match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) => {
                let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    StrataError::database(format!("Malformed stored JSON: {}", e), None)
                })?;
                Ok(Value::from_json(json))
            }
            structured => Ok(structured),
        },
    )
}

/// Format UTC `YYYY-MM-DD HH:MM:SS.mmm` on write, parse the same shape as
/// UTC on read.
fn datetime_filter() -> ValueFilter {
    ValueFilter::new(
        |value| match value {
            Value::Null => Ok(Value::Null),
            Value::Timestamp(ts) => Ok(Value::String(format_datetime(ts))),
            Value::String(text) => {
                let ts = parse_datetime(&text).ok_or_else(|| {
                    StrataError::database(format!("Invalid datetime '{}'", text), None)
                })?;
                Ok(Value::String(format_datetime(ts)))
            }
            other => Err(StrataError::database(
                format!("Cannot encode {} as datetime", other.to_json()),
                None,
            )),
        },
        |value| match value {
            Value::Null => Ok(Value::Null),
            Value::Timestamp(ts) => Ok(Value::Timestamp(ts)),
            Value::String(text) => {
                let ts = parse_datetime(&text).ok_or_else(|| {
                    StrataError::database(format!("Malformed stored datetime '{}'", text), None)
                })?;
                Ok(Value::Timestamp(ts))
            }
            other => Err(StrataError::database(
                format!("Cannot decode {} as datetime", other.to_json()),
                None,
            )),
        },
    )
}

fn builtin_filters() -> HashMap<String, ValueFilter> {
    let mut filters = HashMap::new();
    filters.insert("json".to_string(), json_filter());
    filters.insert("datetime".to_string(), datetime_filter());
    filters
}

/// Register a process-wide filter. Fails on duplicate names, including
/// the built-ins.
pub fn add_filter(name: impl Into<String>, filter: ValueFilter) -> StrataResult<()> {
    let name = name.into();
    let mut filters = GLOBAL_FILTERS.write().expect("filter registry lock");
    if filters.contains_key(&name) {
        return Err(StrataError::conflict(
            "filter",
            &name,
            "already registered",
        ));
    }
    filters.insert(name, filter);
    Ok(())
}

/// Look up a filter, instance registrations first.
pub(crate) fn resolve_filter(
    name: &str,
    instance: &HashMap<String, ValueFilter>,
) -> Option<ValueFilter> {
    instance.get(name).cloned().or_else(|| {
        GLOBAL_FILTERS
            .read()
            .expect("filter registry lock")
            .get(name)
            .cloned()
    })
}
