//! Role strings
//!
//! A role names a grantee in a permission string: `name[:id][/dimension]`.
//! Parsing and formatting round-trip exactly so stored permission strings
//! stay canonical.

use crate::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verification dimension for user-kind roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserDimension {
    Verified,
    Unverified,
}

impl UserDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserDimension::Verified => "verified",
            UserDimension::Unverified => "unverified",
        }
    }

    fn parse(s: &str) -> StrataResult<Self> {
        match s {
            "verified" => Ok(UserDimension::Verified),
            "unverified" => Ok(UserDimension::Unverified),
            other => Err(StrataError::validation(format!(
                "Invalid user dimension '{}', expected verified or unverified",
                other
            ))),
        }
    }
}

/// A parsed role string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Every visitor, authenticated or not.
    Any,
    /// Unauthenticated visitors only.
    Guests,
    /// All authenticated users, optionally narrowed by verification status.
    Users { dimension: Option<UserDimension> },
    /// One user, optionally narrowed by verification status.
    User {
        id: String,
        dimension: Option<UserDimension>,
    },
    /// A team, optionally narrowed to a team dimension such as `owner`.
    Team {
        id: String,
        dimension: Option<String>,
    },
    /// Users carrying a label.
    Label { id: String },
    /// A membership id.
    Member { id: String },
}

impl Role {
    pub fn any() -> Self {
        Role::Any
    }

    pub fn guests() -> Self {
        Role::Guests
    }

    pub fn users() -> Self {
        Role::Users { dimension: None }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Role::User {
            id: id.into(),
            dimension: None,
        }
    }

    pub fn team(id: impl Into<String>) -> Self {
        Role::Team {
            id: id.into(),
            dimension: None,
        }
    }

    pub fn label(id: impl Into<String>) -> Self {
        Role::Label { id: id.into() }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Role::Member { id: id.into() }
    }

    /// The role name without identifier or dimension.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Any => "any",
            Role::Guests => "guests",
            Role::Users { .. } => "users",
            Role::User { .. } => "user",
            Role::Team { .. } => "team",
            Role::Label { .. } => "label",
            Role::Member { .. } => "member",
        }
    }

    /// Parse a role string of the form `name[:id][/dimension]`.
    pub fn parse(input: &str) -> StrataResult<Role> {
        let (head, dimension) = match input.split_once('/') {
            Some((head, dim)) => {
                if dim.is_empty() {
                    return Err(StrataError::validation(format!(
                        "Role '{}' has an empty dimension",
                        input
                    )));
                }
                (head, Some(dim))
            }
            None => (input, None),
        };
        let (name, id) = match head.split_once(':') {
            Some((name, id)) => {
                if id.is_empty() {
                    return Err(StrataError::validation(format!(
                        "Role '{}' has an empty identifier",
                        input
                    )));
                }
                (name, Some(id))
            }
            None => (head, None),
        };

        let reject_id = |role: &str| {
            StrataError::validation(format!("Role '{}' does not accept an identifier", role))
        };
        let reject_dim = |role: &str| {
            StrataError::validation(format!("Role '{}' does not accept a dimension", role))
        };
        let require_id = |role: &str| {
            StrataError::validation(format!("Role '{}' requires an identifier", role))
        };

        match name {
            "any" => {
                if id.is_some() {
                    return Err(reject_id("any"));
                }
                if dimension.is_some() {
                    return Err(reject_dim("any"));
                }
                Ok(Role::Any)
            }
            "guests" => {
                if id.is_some() {
                    return Err(reject_id("guests"));
                }
                if dimension.is_some() {
                    return Err(reject_dim("guests"));
                }
                Ok(Role::Guests)
            }
            "users" => {
                if id.is_some() {
                    return Err(reject_id("users"));
                }
                Ok(Role::Users {
                    dimension: dimension.map(UserDimension::parse).transpose()?,
                })
            }
            "user" => Ok(Role::User {
                id: id.ok_or_else(|| require_id("user"))?.to_string(),
                dimension: dimension.map(UserDimension::parse).transpose()?,
            }),
            "team" => Ok(Role::Team {
                id: id.ok_or_else(|| require_id("team"))?.to_string(),
                dimension: dimension.map(str::to_string),
            }),
            "label" => {
                if dimension.is_some() {
                    return Err(reject_dim("label"));
                }
                Ok(Role::Label {
                    id: id.ok_or_else(|| require_id("label"))?.to_string(),
                })
            }
            "member" => {
                if dimension.is_some() {
                    return Err(reject_dim("member"));
                }
                Ok(Role::Member {
                    id: id.ok_or_else(|| require_id("member"))?.to_string(),
                })
            }
            other => Err(StrataError::validation(format!(
                "Unknown role '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Any => write!(f, "any"),
            Role::Guests => write!(f, "guests"),
            Role::Users { dimension: None } => write!(f, "users"),
            Role::Users {
                dimension: Some(dim),
            } => write!(f, "users/{}", dim.as_str()),
            Role::User { id, dimension } => {
                write!(f, "user:{}", id)?;
                if let Some(dim) = dimension {
                    write!(f, "/{}", dim.as_str())?;
                }
                Ok(())
            }
            Role::Team { id, dimension } => {
                write!(f, "team:{}", id)?;
                if let Some(dim) = dimension {
                    write!(f, "/{}", dim)?;
                }
                Ok(())
            }
            Role::Label { id } => write!(f, "label:{}", id),
            Role::Member { id } => write!(f, "member:{}", id),
        }
    }
}

impl FromStr for Role {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_canonical_roles() {
        assert_eq!(Role::parse("any").unwrap(), Role::Any);
        assert_eq!(Role::parse("guests").unwrap(), Role::Guests);
        assert_eq!(
            Role::parse("users/verified").unwrap(),
            Role::Users {
                dimension: Some(UserDimension::Verified)
            }
        );
        assert_eq!(Role::parse("user:abc").unwrap(), Role::user("abc"));
        assert_eq!(
            Role::parse("team:dev/owner").unwrap(),
            Role::Team {
                id: "dev".into(),
                dimension: Some("owner".into())
            }
        );
        assert_eq!(Role::parse("label:beta").unwrap(), Role::label("beta"));
        assert_eq!(Role::parse("member:m1").unwrap(), Role::member("m1"));
    }

    #[test]
    fn test_reject_malformed() {
        assert!(Role::parse("any:x").is_err());
        assert!(Role::parse("any/verified").is_err());
        assert!(Role::parse("guests:x").is_err());
        assert!(Role::parse("users:x").is_err());
        assert!(Role::parse("user").is_err());
        assert!(Role::parse("user:").is_err());
        assert!(Role::parse("user:x/").is_err());
        assert!(Role::parse("user:x/sideways").is_err());
        assert!(Role::parse("admin").is_err());
        assert!(Role::parse("label:x/dim").is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            name in prop::sample::select(vec!["user", "team", "label", "member"]),
            id in "[a-z0-9]{1,8}",
        ) {
            let input = format!("{}:{}", name, id);
            let role = Role::parse(&input).unwrap();
            prop_assert_eq!(role.to_string(), input);
        }
    }

    #[test]
    fn test_round_trip_with_dimensions() {
        for input in [
            "any",
            "guests",
            "users",
            "users/unverified",
            "user:a1/verified",
            "team:t9/editor",
        ] {
            assert_eq!(Role::parse(input).unwrap().to_string(), input);
        }
    }
}
