//! Permission and role list validators

use strata_core::{Permission, Role, StrataError, StrataResult, Value};

/// Default cap on the number of permission strings per holder.
pub const MAX_PERMISSIONS: usize = 100;

/// Validates a list of permission strings: each must parse, and the list
/// must stay under the cap.
#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub limit: usize,
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions {
            limit: MAX_PERMISSIONS,
        }
    }
}

impl Permissions {
    pub fn new(limit: usize) -> Self {
        Permissions { limit }
    }

    pub fn validate(&self, permissions: &[Value]) -> StrataResult<()> {
        if permissions.len() > self.limit {
            return Err(StrataError::validation(format!(
                "At most {} permissions are allowed, got {}",
                self.limit,
                permissions.len()
            )));
        }
        for value in permissions {
            let text = value.as_str().ok_or_else(|| {
                StrataError::validation(format!(
                    "Permission must be a string, got {}",
                    value.to_json()
                ))
            })?;
            Permission::parse(text)?;
        }
        Ok(())
    }

    pub fn validate_strings(&self, permissions: &[String]) -> StrataResult<()> {
        let values: Vec<Value> = permissions
            .iter()
            .map(|p| Value::String(p.clone()))
            .collect();
        self.validate(&values)
    }
}

/// Validates a list of role strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Roles;

impl Roles {
    pub fn validate(&self, roles: &[String]) -> StrataResult<()> {
        for role in roles {
            Role::parse(role)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions() {
        let validator = Permissions::default();
        assert!(validator
            .validate(&[
                Value::from("read(\"any\")"),
                Value::from("write(\"user:bob\")"),
            ])
            .is_ok());
        assert!(validator.validate(&[Value::from("fly(\"any\")")]).is_err());
        assert!(validator.validate(&[Value::Integer(1)]).is_err());
    }

    #[test]
    fn test_permissions_cap() {
        let validator = Permissions::new(2);
        let many: Vec<Value> = (0..3).map(|_| Value::from("read(\"any\")")).collect();
        assert!(validator.validate(&many).is_err());
    }

    #[test]
    fn test_roles() {
        let validator = Roles;
        assert!(validator
            .validate(&["any".to_string(), "user:bob/verified".to_string()])
            .is_ok());
        assert!(validator.validate(&["pirate".to_string()]).is_err());
    }
}
