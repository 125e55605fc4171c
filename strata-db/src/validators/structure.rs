//! Document structure validator
//!
//! Validates a whole document against its collection schema: system
//! attributes are injected, unknown attributes are rejected, required
//! attributes must be present on create, every value must match its
//! attribute's type, size, and optional format, arrays validate
//! element-wise, and relationship values must obey their side semantics.

use super::scalars::{
    BooleanValidator, DatetimeValidator, FloatValidator, IntegerValidator, TextValidator,
    UuidValidator,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use strata_core::{
    Attribute, AttributeType, Collection, Doc, RelationOptions, StrataError, StrataResult, Value,
};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\S+$").expect("valid regex"));

/// Keys allowed inside a multi-link relationship object.
const LINK_OPERATIONS: [&str; 3] = ["set", "connect", "disconnect"];

pub struct Structure<'a> {
    collection: &'a Collection,
}

impl<'a> Structure<'a> {
    pub fn new(collection: &'a Collection) -> Self {
        Structure { collection }
    }

    /// Validate a full document. `is_create` additionally enforces
    /// required attributes and relationship `set` lists.
    pub fn validate(&self, doc: &Doc, is_create: bool) -> StrataResult<()> {
        self.reject_unknown(doc)?;
        if is_create {
            for attribute in &self.collection.attributes {
                if !attribute.required || attribute.is_relationship() {
                    continue;
                }
                let missing = doc
                    .get(&attribute.key)
                    .map(Value::is_null)
                    .unwrap_or(true);
                if missing {
                    return Err(StrataError::validation(format!(
                        "Missing required attribute '{}'",
                        attribute.key
                    )));
                }
            }
        }
        self.validate_present(doc, is_create)
    }

    /// Validate a partial update: present values must be well-formed, but
    /// absent required attributes are fine.
    pub fn validate_partial(&self, doc: &Doc) -> StrataResult<()> {
        self.reject_unknown(doc)?;
        self.validate_present(doc, false)
    }

    fn reject_unknown(&self, doc: &Doc) -> StrataResult<()> {
        for key in doc.keys() {
            if Doc::SYSTEM_FIELDS.contains(&key) {
                continue;
            }
            if self.collection.attribute(key).is_none() {
                return Err(StrataError::validation(format!(
                    "Unknown attribute '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    fn validate_present(&self, doc: &Doc, is_create: bool) -> StrataResult<()> {
        for attribute in &self.collection.attributes {
            let Some(value) = doc.get(&attribute.key) else {
                continue;
            };
            self.validate_value(attribute, value, is_create)
                .map_err(|err| match err {
                    StrataError::Validation { message } => StrataError::validation(format!(
                        "Invalid value for attribute '{}': {}",
                        attribute.key, message
                    )),
                    other => other,
                })?;
        }
        Ok(())
    }

    fn validate_value(
        &self,
        attribute: &Attribute,
        value: &Value,
        is_create: bool,
    ) -> StrataResult<()> {
        if let Some(options) = attribute.options.as_ref().filter(|_| attribute.is_relationship())
        {
            return self.validate_relationship(options, value, is_create);
        }

        if value.is_null() {
            if attribute.required {
                return Err(StrataError::validation("attribute is required".to_string()));
            }
            return Ok(());
        }

        if attribute.array {
            let items = value
                .as_array()
                .ok_or_else(|| StrataError::validation("expected an array".to_string()))?;
            for item in items {
                if !item.is_null() {
                    self.validate_element(attribute, item)?;
                }
            }
            return Ok(());
        }
        self.validate_element(attribute, value)
    }

    fn validate_element(&self, attribute: &Attribute, value: &Value) -> StrataResult<()> {
        match attribute.type_ {
            AttributeType::String => {
                TextValidator::new(attribute.size.max(0) as usize).validate(value)?;
                self.validate_format(attribute, value)
            }
            AttributeType::Integer => IntegerValidator::new(attribute.size).validate(value),
            AttributeType::Float => FloatValidator.validate(value),
            AttributeType::Boolean => BooleanValidator.validate(value),
            AttributeType::Timestamptz => DatetimeValidator.validate(value),
            AttributeType::Uuid => UuidValidator.validate(value),
            // Any JSON-representable value is acceptable.
            AttributeType::Json => Ok(()),
            AttributeType::Virtual => Ok(()),
            AttributeType::Relationship => Err(StrataError::internal(
                "Relationship attribute without options",
            )),
        }
    }

    fn validate_format(&self, attribute: &Attribute, value: &Value) -> StrataResult<()> {
        let Some(format) = attribute.format.as_deref() else {
            return Ok(());
        };
        let text = value.as_str().unwrap_or_default();
        let ok = match format {
            "email" => EMAIL_RE.is_match(text),
            "url" => URL_RE.is_match(text),
            "ip" => text.parse::<IpAddr>().is_ok(),
            "enum" => attribute
                .format_options
                .get("elements")
                .and_then(|e| e.as_array())
                .map(|elements| elements.iter().any(|e| e.as_str() == Some(text)))
                .unwrap_or(false),
            other => {
                return Err(StrataError::validation(format!(
                    "unknown format '{}'",
                    other
                )))
            }
        };
        if !ok {
            return Err(StrataError::validation(format!(
                "'{}' does not satisfy format '{}'",
                text, format
            )));
        }
        Ok(())
    }

    fn validate_relationship(
        &self,
        options: &RelationOptions,
        value: &Value,
        is_create: bool,
    ) -> StrataResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if !options.is_multi() {
            return match value {
                Value::String(_) => Ok(()),
                _ => Err(StrataError::validation(
                    "expected a related document id or null".to_string(),
                )),
            };
        }

        let map = value.as_object().ok_or_else(|| {
            StrataError::validation(
                "expected an object with set/connect/disconnect lists".to_string(),
            )
        })?;
        for key in map.keys() {
            if !LINK_OPERATIONS.contains(&key.as_str()) {
                return Err(StrataError::validation(format!(
                    "unknown link operation '{}'",
                    key
                )));
            }
        }
        if is_create && !map.contains_key("set") {
            return Err(StrataError::validation(
                "'set' is required when creating".to_string(),
            ));
        }
        for (operation, ids) in map {
            let ids = ids.as_array().ok_or_else(|| {
                StrataError::validation(format!("'{}' must be a list of ids", operation))
            })?;
            for id in ids {
                if id.as_str().is_none() {
                    return Err(StrataError::validation(format!(
                        "'{}' must contain string ids",
                        operation
                    )));
                }
            }
        }
        Ok(())
    }
}
