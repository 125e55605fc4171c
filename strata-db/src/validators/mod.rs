//! Validators
//!
//! Composable predicates over identifiers, scalar values, permission
//! lists, index definitions, whole documents, and query lists. Each
//! validator exposes `validate(...) -> StrataResult<()>` and reports the
//! first violation as a `Validation` error carrying a description.

mod index;
mod key;
mod permissions;
mod queries;
mod scalars;
mod structure;

pub use index::{IndexDependency, IndexValidator};
pub use key::{Key, Label};
pub use permissions::{Permissions, Roles};
pub use queries::QueriesValidator;
pub use scalars::{
    BooleanValidator, DatetimeValidator, FloatValidator, IntegerValidator, Range, TextValidator,
    UuidValidator,
};
pub use structure::Structure;
