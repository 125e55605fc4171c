//! Authorization context
//!
//! A process-wide default role set plus a request-scoped override carried
//! on a tokio task-local. Mutations inside a scope affect only that scope;
//! outside any scope they affect the process default, so concurrent
//! requests on one engine instance never observe each other's roles.

use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::future::Future;
use std::sync::RwLock;
use strata_core::{aggregate, Permission, PermissionKind};

/// The active role set and enforcement flag.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub roles: Vec<String>,
    pub enabled: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        AuthState {
            roles: vec!["any".to_string()],
            enabled: true,
        }
    }
}

static DEFAULT_STATE: Lazy<RwLock<AuthState>> = Lazy::new(|| RwLock::new(AuthState::default()));

tokio::task_local! {
    static CONTEXT: RefCell<AuthState>;
}

/// Role evaluation against permission lists.
pub struct Authorization;

impl Authorization {
    fn has_context() -> bool {
        CONTEXT.try_with(|_| ()).is_ok()
    }

    fn inspect<T>(f: impl FnOnce(&AuthState) -> T) -> T {
        if Self::has_context() {
            CONTEXT.with(|ctx| f(&ctx.borrow()))
        } else {
            f(&DEFAULT_STATE.read().expect("authorization lock"))
        }
    }

    fn mutate(f: impl FnOnce(&mut AuthState)) {
        if Self::has_context() {
            CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()));
        } else {
            f(&mut DEFAULT_STATE.write().expect("authorization lock"));
        }
    }

    /// Add a role to the active set.
    pub fn set_role(role: impl Into<String>) {
        let role = role.into();
        Self::mutate(|state| {
            if !state.roles.contains(&role) {
                state.roles.push(role);
            }
        });
    }

    /// Remove a role from the active set.
    pub fn unset_role(role: &str) {
        Self::mutate(|state| state.roles.retain(|r| r != role));
    }

    /// The active role set.
    pub fn roles() -> Vec<String> {
        Self::inspect(|state| state.roles.clone())
    }

    /// Drop every role from the active set.
    pub fn clean_roles() {
        Self::mutate(|state| state.roles.clear());
    }

    pub fn is_role(role: &str) -> bool {
        Self::inspect(|state| state.roles.iter().any(|r| r == role))
    }

    /// Whether permission checks are enforced.
    pub fn status() -> bool {
        Self::inspect(|state| state.enabled)
    }

    pub fn set_status(enabled: bool) {
        Self::mutate(|state| state.enabled = enabled);
    }

    pub fn enable() {
        Self::set_status(true);
    }

    pub fn disable() {
        Self::set_status(false);
    }

    /// Run `body` with enforcement disabled, restoring the surrounding
    /// state afterwards. The suspension is scoped to the current task.
    pub async fn skip<F, T>(body: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut state = Self::inspect(AuthState::clone);
        state.enabled = false;
        CONTEXT.scope(RefCell::new(state), body).await
    }

    /// Run `body` with its own role set, isolated from the surrounding
    /// context and the process default.
    pub async fn with_roles<F, T>(roles: Vec<String>, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut state = Self::inspect(AuthState::clone);
        state.roles = roles;
        CONTEXT.scope(RefCell::new(state), body).await
    }

    /// Whether the active role set grants `kind` under the given
    /// permission strings. Always passes while enforcement is disabled.
    /// Aggregate kinds are expanded before matching, so a stored
    /// `write("r")` never reaches this check.
    pub fn is_authorized(kind: PermissionKind, permissions: &[String]) -> bool {
        if !Self::status() {
            return true;
        }
        let roles = Self::roles();
        let parsed: Vec<Permission> = permissions
            .iter()
            .filter_map(|p| Permission::parse(p).ok())
            .collect();
        aggregate(&parsed)
            .iter()
            .filter(|permission| permission.kind() == kind)
            .any(|permission| {
                let role = permission.role().to_string();
                roles.iter().any(|active| *active == role)
            })
    }
}
