//! Permission strings
//!
//! A permission string grants one action kind to one role:
//! `kind("role[:id][/dimension]")`. The `write` kind is an aggregate that
//! expands to `create`, `update`, and `delete` at validation time; the
//! storage layer only ever sees the terminal kinds.

use crate::{Role, StrataError, StrataResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Action kind of a permission string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Create,
    Read,
    Update,
    Delete,
    /// Aggregate of create, update, and delete. Never persisted.
    Write,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Create => "create",
            PermissionKind::Read => "read",
            PermissionKind::Update => "update",
            PermissionKind::Delete => "delete",
            PermissionKind::Write => "write",
        }
    }

    pub fn parse(s: &str) -> StrataResult<Self> {
        match s {
            "create" => Ok(PermissionKind::Create),
            "read" => Ok(PermissionKind::Read),
            "update" => Ok(PermissionKind::Update),
            "delete" => Ok(PermissionKind::Delete),
            "write" => Ok(PermissionKind::Write),
            other => Err(StrataError::validation(format!(
                "Unknown permission kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static PERMISSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(create|read|update|delete|write)\("([^"]+)"\)$"#).expect("valid regex")
});

/// A parsed permission string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    kind: PermissionKind,
    role: Role,
}

impl Permission {
    pub fn new(kind: PermissionKind, role: Role) -> Self {
        Self { kind, role }
    }

    pub fn create(role: Role) -> Self {
        Self::new(PermissionKind::Create, role)
    }

    pub fn read(role: Role) -> Self {
        Self::new(PermissionKind::Read, role)
    }

    pub fn update(role: Role) -> Self {
        Self::new(PermissionKind::Update, role)
    }

    pub fn delete(role: Role) -> Self {
        Self::new(PermissionKind::Delete, role)
    }

    pub fn write(role: Role) -> Self {
        Self::new(PermissionKind::Write, role)
    }

    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Parse a permission string of the form `kind("role")`.
    pub fn parse(input: &str) -> StrataResult<Permission> {
        let captures = PERMISSION_RE.captures(input).ok_or_else(|| {
            StrataError::validation(format!(
                "Invalid permission string '{}', expected kind(\"role\")",
                input
            ))
        })?;
        let kind = PermissionKind::parse(&captures[1])?;
        let role = Role::parse(&captures[2])?;
        Ok(Permission { kind, role })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(\"{}\")", self.kind, self.role)
    }
}

impl FromStr for Permission {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::parse(s)
    }
}

impl Serialize for Permission {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Permission::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Expand aggregate kinds into terminal kinds, deduplicating while
/// preserving first-seen order. `write("r")` becomes `create("r")`,
/// `update("r")`, `delete("r")`.
pub fn aggregate(permissions: &[Permission]) -> Vec<Permission> {
    let mut expanded: Vec<Permission> = Vec::with_capacity(permissions.len());
    let mut push = |perm: Permission, out: &mut Vec<Permission>| {
        if !out.contains(&perm) {
            out.push(perm);
        }
    };
    for permission in permissions {
        match permission.kind {
            PermissionKind::Write => {
                for kind in [
                    PermissionKind::Create,
                    PermissionKind::Update,
                    PermissionKind::Delete,
                ] {
                    push(Permission::new(kind, permission.role.clone()), &mut expanded);
                }
            }
            _ => push(permission.clone(), &mut expanded),
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_format() {
        let p = Permission::parse(r#"read("any")"#).unwrap();
        assert_eq!(p.kind(), PermissionKind::Read);
        assert_eq!(p.role(), &Role::Any);
        assert_eq!(p.to_string(), r#"read("any")"#);

        let p = Permission::parse(r#"update("user:abc/verified")"#).unwrap();
        assert_eq!(p.to_string(), r#"update("user:abc/verified")"#);
    }

    #[test]
    fn test_reject_malformed() {
        assert!(Permission::parse("read(any)").is_err());
        assert!(Permission::parse(r#"browse("any")"#).is_err());
        assert!(Permission::parse(r#"read("any"#).is_err());
        assert!(Permission::parse(r#"read("nope:x")"#).is_err());
        assert!(Permission::parse("").is_err());
    }

    #[test]
    fn test_aggregate_write_expansion() {
        let expanded = aggregate(&[Permission::write(Role::Any)]);
        assert_eq!(
            expanded,
            vec![
                Permission::create(Role::Any),
                Permission::update(Role::Any),
                Permission::delete(Role::Any),
            ]
        );
    }

    #[test]
    fn test_aggregate_dedup() {
        let expanded = aggregate(&[
            Permission::create(Role::Any),
            Permission::write(Role::Any),
            Permission::read(Role::Any),
        ]);
        // create appears once, in first-seen position.
        assert_eq!(
            expanded,
            vec![
                Permission::create(Role::Any),
                Permission::update(Role::Any),
                Permission::delete(Role::Any),
                Permission::read(Role::Any),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            kind in prop::sample::select(vec!["create", "read", "update", "delete", "write"]),
            id in "[a-z0-9]{1,8}",
        ) {
            let input = format!("{}(\"user:{}\")", kind, id);
            let parsed = Permission::parse(&input).unwrap();
            prop_assert_eq!(parsed.to_string(), input);
        }
    }
}
