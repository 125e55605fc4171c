//! Dynamic parameter binding and row decoding
//!
//! The engine works with schema known only at runtime, so parameters and
//! result columns are bridged dynamically: [`PgParam`] adapts a [`Value`]
//! to whatever column type the statement expects, and [`column_value`]
//! decodes a result column back into a [`Value`] based on its declared
//! type.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use std::error::Error as StdError;
use strata_core::{format_datetime, parse_datetime, StrataError, StrataResult, Value};
use tokio_postgres::Row;
use uuid::Uuid;

type BoxError = Box<dyn StdError + Sync + Send>;

/// A [`Value`] bound as a statement parameter.
///
/// Binding is driven by the target column type: strings coerce into
/// timestamps, uuids, and jsonb where the column asks for them, numeric
/// kinds widen and narrow as needed, arrays bind element-wise.
#[derive(Debug, Clone)]
pub struct PgParam(pub Value);

impl PgParam {
    fn bind_string(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if *ty == Type::TIMESTAMPTZ {
            let ts =
                parse_datetime(s).ok_or_else(|| format!("Cannot bind '{}' as timestamptz", s))?;
            ts.to_sql(ty, out)
        } else if *ty == Type::UUID {
            Uuid::parse_str(s)
                .map_err(|e| format!("Cannot bind '{}' as uuid: {}", s, e))?
                .to_sql(ty, out)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            // Json-filtered attributes arrive as serialized text; store
            // the parsed form so jsonb operators see the structure.
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(parsed) => parsed.to_sql(ty, out),
                Err(_) => serde_json::Value::String(s.to_string()).to_sql(ty, out),
            }
        } else {
            s.to_sql(ty, out)
        }
    }

    fn bind_array(items: &[Value], ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if *ty == Type::JSON || *ty == Type::JSONB {
            Value::Array(items.to_vec()).to_json().to_sql(ty, out)
        } else if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY {
            let strings: Vec<String> = items.iter().map(|item| item.to_string()).collect();
            strings.to_sql(ty, out)
        } else if *ty == Type::INT8_ARRAY || *ty == Type::INT4_ARRAY || *ty == Type::INT2_ARRAY {
            let integers: Vec<i64> = items
                .iter()
                .map(|item| {
                    item.as_integer()
                        .ok_or_else(|| format!("Non-integer element in {} array", ty))
                })
                .collect::<Result<_, _>>()?;
            integers.to_sql(ty, out)
        } else if *ty == Type::FLOAT8_ARRAY || *ty == Type::FLOAT4_ARRAY {
            let floats: Vec<f64> = items
                .iter()
                .map(|item| {
                    item.as_float()
                        .ok_or_else(|| format!("Non-numeric element in {} array", ty))
                })
                .collect::<Result<_, _>>()?;
            floats.to_sql(ty, out)
        } else if *ty == Type::BOOL_ARRAY {
            let bools: Vec<bool> = items
                .iter()
                .map(|item| {
                    item.as_bool()
                        .ok_or_else(|| format!("Non-boolean element in {} array", ty))
                })
                .collect::<Result<_, _>>()?;
            bools.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMPTZ_ARRAY {
            let stamps: Vec<DateTime<Utc>> = items
                .iter()
                .map(|item| {
                    item.as_timestamp()
                        .ok_or_else(|| format!("Non-timestamp element in {} array", ty))
                })
                .collect::<Result<_, _>>()?;
            stamps.to_sql(ty, out)
        } else {
            Err(format!("Cannot bind an array as {}", ty).into())
        }
    }
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Integer(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Value::String(s) => Self::bind_string(s, ty, out),
            Value::Timestamp(ts) => {
                if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    format_datetime(*ts).to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
            Value::Array(items) => Self::bind_array(items, ty, out),
            Value::Object(_) | Value::Doc(_) => {
                if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    self.0.to_json().to_string().to_sql(ty, out)
                } else {
                    self.0.to_json().to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Acceptance is decided per value inside to_sql.
        true
    }

    to_sql_checked!();
}

/// Decode one result column into a [`Value`] based on its declared type.
///
/// `timestamptz` becomes a native timestamp; other date/time kinds pass
/// through as text for later filter decoding; SQL NULL becomes
/// [`Value::Null`].
pub fn column_value(row: &Row, idx: usize) -> StrataResult<Value> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a Row,
        idx: usize,
    ) -> StrataResult<Option<T>> {
        row.try_get::<_, Option<T>>(idx)
            .map_err(|e| StrataError::database(format!("Column decode: {}", e), None))
    }

    let ty = row.columns()[idx].type_().clone();
    let value = if ty == Type::BOOL {
        get::<bool>(row, idx)?.map(Value::Bool)
    } else if ty == Type::INT2 {
        get::<i16>(row, idx)?.map(|v| Value::Integer(v as i64))
    } else if ty == Type::INT4 {
        get::<i32>(row, idx)?.map(|v| Value::Integer(v as i64))
    } else if ty == Type::INT8 {
        get::<i64>(row, idx)?.map(Value::Integer)
    } else if ty == Type::FLOAT4 {
        get::<f32>(row, idx)?.map(|v| Value::Float(v as f64))
    } else if ty == Type::FLOAT8 {
        get::<f64>(row, idx)?.map(Value::Float)
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR || ty == Type::NAME {
        get::<String>(row, idx)?.map(Value::String)
    } else if ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp)
    } else if ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, idx)?.map(|v| Value::String(format_datetime(v.and_utc())))
    } else if ty == Type::DATE {
        get::<NaiveDate>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if ty == Type::TIME {
        get::<NaiveTime>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if ty == Type::JSON || ty == Type::JSONB {
        get::<serde_json::Value>(row, idx)?.map(Value::from_json)
    } else if ty == Type::UUID {
        get::<Uuid>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if ty == Type::TEXT_ARRAY || ty == Type::VARCHAR_ARRAY {
        get::<Vec<String>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
    } else if ty == Type::INT2_ARRAY {
        get::<Vec<i16>>(row, idx)?.map(|items| {
            Value::Array(items.into_iter().map(|v| Value::Integer(v as i64)).collect())
        })
    } else if ty == Type::INT4_ARRAY {
        get::<Vec<i32>>(row, idx)?.map(|items| {
            Value::Array(items.into_iter().map(|v| Value::Integer(v as i64)).collect())
        })
    } else if ty == Type::INT8_ARRAY {
        get::<Vec<i64>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::Integer).collect()))
    } else if ty == Type::FLOAT8_ARRAY {
        get::<Vec<f64>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::Float).collect()))
    } else if ty == Type::BOOL_ARRAY {
        get::<Vec<bool>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::Bool).collect()))
    } else if ty == Type::TIMESTAMPTZ_ARRAY {
        get::<Vec<DateTime<Utc>>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::Timestamp).collect()))
    } else if ty == Type::JSONB_ARRAY {
        get::<Vec<serde_json::Value>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::from_json).collect()))
    } else {
        return Err(StrataError::database(
            format!("Unsupported column type '{}'", ty),
            None,
        ));
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: Value, ty: &Type) -> Result<IsNull, BoxError> {
        let mut buf = BytesMut::new();
        PgParam(value).to_sql(ty, &mut buf)
    }

    #[test]
    fn test_null_binds_as_null() {
        assert!(matches!(
            encode(Value::Null, &Type::TEXT).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn test_scalar_binding() {
        assert!(matches!(
            encode(Value::Integer(5), &Type::INT8).unwrap(),
            IsNull::No
        ));
        assert!(matches!(
            encode(Value::Integer(5), &Type::INT4).unwrap(),
            IsNull::No
        ));
        assert!(matches!(
            encode(Value::Float(1.5), &Type::FLOAT8).unwrap(),
            IsNull::No
        ));
        assert!(matches!(
            encode(Value::Bool(true), &Type::BOOL).unwrap(),
            IsNull::No
        ));
    }

    #[test]
    fn test_string_coercions() {
        // Wire-format timestamps bind to timestamptz columns.
        assert!(encode(
            Value::String("2024-03-01 12:30:45.123".to_string()),
            &Type::TIMESTAMPTZ
        )
        .is_ok());
        assert!(encode(Value::String("not a date".to_string()), &Type::TIMESTAMPTZ).is_err());

        assert!(encode(
            Value::String("550e8400-e29b-41d4-a716-446655440000".to_string()),
            &Type::UUID
        )
        .is_ok());
        assert!(encode(Value::String("nope".to_string()), &Type::UUID).is_err());
    }

    #[test]
    fn test_json_strings_bind_parsed() {
        // Serialized objects from the json filter store as structure.
        assert!(encode(
            Value::String(r#"{"a": [1, 2]}"#.to_string()),
            &Type::JSONB
        )
        .is_ok());
        // Plain text still binds, as a JSON string scalar.
        assert!(encode(Value::String("plain".to_string()), &Type::JSONB).is_ok());
    }

    #[test]
    fn test_array_binding() {
        let strings = Value::Array(vec!["a".into(), "b".into()]);
        assert!(encode(strings, &Type::TEXT_ARRAY).is_ok());

        let integers = Value::Array(vec![1i64.into(), 2i64.into()]);
        assert!(encode(integers.clone(), &Type::INT8_ARRAY).is_ok());
        assert!(encode(integers, &Type::BOOL_ARRAY).is_err());
    }
}
