//! Scalar value validators

use strata_core::{parse_datetime, StrataError, StrataResult, Value};
use uuid::Uuid;

/// Text with a maximum length in characters.
#[derive(Debug, Clone, Copy)]
pub struct TextValidator {
    pub length: usize,
}

impl TextValidator {
    pub fn new(length: usize) -> Self {
        TextValidator { length }
    }

    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let text = value.as_str().ok_or_else(|| {
            StrataError::validation(format!("Expected a string, got {}", value.to_json()))
        })?;
        if self.length > 0 && text.chars().count() > self.length {
            return Err(StrataError::validation(format!(
                "Text exceeds maximum length of {} characters",
                self.length
            )));
        }
        Ok(())
    }
}

/// Integer with an optional byte-width bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerValidator {
    /// When under 8, values must fit a 32-bit column.
    pub size: i64,
}

impl IntegerValidator {
    pub fn new(size: i64) -> Self {
        IntegerValidator { size }
    }

    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let integer = value.as_integer().ok_or_else(|| {
            StrataError::validation(format!("Expected an integer, got {}", value.to_json()))
        })?;
        if self.size > 0 && self.size < 8 && (integer > i32::MAX as i64 || integer < i32::MIN as i64)
        {
            return Err(StrataError::validation(format!(
                "Integer {} does not fit a {}-byte column",
                integer, self.size
            )));
        }
        Ok(())
    }
}

/// Finite floating point numbers; integers widen.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatValidator;

impl FloatValidator {
    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let float = value.as_float().ok_or_else(|| {
            StrataError::validation(format!("Expected a number, got {}", value.to_json()))
        })?;
        if !float.is_finite() {
            return Err(StrataError::validation("Number must be finite"));
        }
        Ok(())
    }
}

/// Boolean values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanValidator;

impl BooleanValidator {
    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        value.as_bool().map(|_| ()).ok_or_else(|| {
            StrataError::validation(format!("Expected a boolean, got {}", value.to_json()))
        })
    }
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Range { min, max }
    }

    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let number = value.as_float().ok_or_else(|| {
            StrataError::validation(format!("Expected a number, got {}", value.to_json()))
        })?;
        if number < self.min || number > self.max {
            return Err(StrataError::validation(format!(
                "Value {} must be between {} and {}",
                number, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Timestamps in the wire format (or native), bounded to sane years.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatetimeValidator;

impl DatetimeValidator {
    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let ts = match value {
            Value::Timestamp(ts) => *ts,
            Value::String(text) => parse_datetime(text).ok_or_else(|| {
                StrataError::validation(format!("Invalid datetime '{}'", text))
            })?,
            other => {
                return Err(StrataError::validation(format!(
                    "Expected a datetime, got {}",
                    other.to_json()
                )))
            }
        };
        let year = ts.format("%Y").to_string().parse::<i64>().unwrap_or(0);
        if !(0..=9999).contains(&year) {
            return Err(StrataError::validation(format!(
                "Datetime year {} is out of range",
                year
            )));
        }
        Ok(())
    }
}

/// RFC 4122 UUID strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidValidator;

impl UuidValidator {
    pub fn validate(&self, value: &Value) -> StrataResult<()> {
        let text = value.as_str().ok_or_else(|| {
            StrataError::validation(format!("Expected a UUID string, got {}", value.to_json()))
        })?;
        Uuid::parse_str(text)
            .map(|_| ())
            .map_err(|_| StrataError::validation(format!("Invalid UUID '{}'", text)))
    }
}
