//! Named-listener emitter with a wildcard channel and silence scopes.

use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use strata_core::{StrataError, StrataResult};
use tracing::error;

/// Wildcard channel. Its listeners observe every triggered event and
/// receive the original event name.
pub const WILDCARD: &str = "*";

/// Reserved channel for listener failures. Listeners on this channel
/// receive `{event, listener, error}` payloads.
pub const ERROR_EVENT: &str = "error";

type Listener = Arc<dyn Fn(&str, &JsonValue) -> StrataResult<()> + Send + Sync>;

/// Which listeners the current task has silenced.
#[derive(Debug, Clone, Default)]
enum Silence {
    #[default]
    None,
    All,
    Named(HashSet<String>),
}

tokio::task_local! {
    static SILENCED: RefCell<Silence>;
}

fn is_silenced(name: &str) -> bool {
    SILENCED
        .try_with(|silence| match &*silence.borrow() {
            Silence::None => false,
            Silence::All => true,
            Silence::Named(names) => names.contains(name),
        })
        .unwrap_or(false)
}

/// Run `body` with the given listener names silenced, or every listener
/// when `names` is `None`. The silence is scoped to the current task and
/// restored when the future completes.
pub async fn silent<F, T>(names: Option<Vec<String>>, body: F) -> T
where
    F: Future<Output = T>,
{
    let silence = match names {
        None => Silence::All,
        Some(names) => Silence::Named(names.into_iter().collect()),
    };
    SILENCED.scope(RefCell::new(silence), body).await
}

/// Fire-and-forget event emitter with name-keyed listeners per event.
#[derive(Clone, Default)]
pub struct Emitter {
    listeners: Arc<RwLock<HashMap<String, IndexMap<String, Listener>>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a unique name for an event. Registering
    /// the same name twice on one event is a conflict.
    pub fn on<F>(&self, event: &str, name: &str, handler: F) -> StrataResult<()>
    where
        F: Fn(&str, &JsonValue) -> StrataResult<()> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().expect("emitter lock");
        let channel = listeners.entry(event.to_string()).or_default();
        if channel.contains_key(name) {
            return Err(StrataError::conflict(
                "listener",
                name,
                format!("already registered for event '{}'", event),
            ));
        }
        channel.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Remove a listener. Returns whether it existed.
    pub fn off(&self, event: &str, name: &str) -> bool {
        let mut listeners = self.listeners.write().expect("emitter lock");
        listeners
            .get_mut(event)
            .and_then(|channel| channel.shift_remove(name))
            .is_some()
    }

    /// Trigger an event. Listeners run synchronously in registration
    /// order but their outcome never reaches the caller: failures are
    /// re-emitted on the `error` channel, and an unhandled `error` falls
    /// back to log output.
    pub fn trigger(&self, event: &str, payload: &JsonValue) {
        let targets: Vec<(String, Listener)> = {
            let listeners = self.listeners.read().expect("emitter lock");
            let mut targets = Vec::new();
            if let Some(channel) = listeners.get(event) {
                for (name, listener) in channel {
                    targets.push((name.clone(), Arc::clone(listener)));
                }
            }
            if event != WILDCARD {
                if let Some(channel) = listeners.get(WILDCARD) {
                    for (name, listener) in channel {
                        targets.push((name.clone(), Arc::clone(listener)));
                    }
                }
            }
            targets
        };

        for (name, listener) in targets {
            if is_silenced(&name) {
                continue;
            }
            if let Err(err) = listener(event, payload) {
                self.emit_error(event, &name, &err);
            }
        }
    }

    /// Deliver a listener failure on the `error` channel; fall back to the
    /// standard error log when nothing handles it.
    fn emit_error(&self, event: &str, listener_name: &str, err: &StrataError) {
        if event == ERROR_EVENT {
            // An error listener itself failed; do not recurse.
            error!(event, listener = listener_name, error = %err, "Error listener failed");
            return;
        }

        let payload = json!({
            "event": event,
            "listener": listener_name,
            "error": err.to_string(),
        });
        let handled = {
            let listeners = self.listeners.read().expect("emitter lock");
            listeners
                .get(ERROR_EVENT)
                .map(|channel| !channel.is_empty())
                .unwrap_or(false)
        };
        if handled {
            self.trigger(ERROR_EVENT, &payload);
        } else {
            error!(event, listener = listener_name, error = %err, "Event listener failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter_listener(counter: Arc<AtomicUsize>) -> impl Fn(&str, &JsonValue) -> StrataResult<()> {
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_trigger_reaches_named_listener() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter
            .on("document_create", "audit", counter_listener(count.clone()))
            .unwrap();

        emitter.trigger("document_create", &json!({"$id": "a"}));
        emitter.trigger("document_delete", &json!({"$id": "a"}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_name_fails() {
        let emitter = Emitter::new();
        emitter.on("x", "n", |_, _| Ok(())).unwrap();
        assert!(emitter.on("x", "n", |_, _| Ok(())).is_err());
        // Same name on a different event is fine.
        emitter.on("y", "n", |_, _| Ok(())).unwrap();
    }

    #[test]
    fn test_off() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.on("x", "n", counter_listener(count.clone())).unwrap();
        assert!(emitter.off("x", "n"));
        assert!(!emitter.off("x", "n"));
        emitter.trigger("x", &JsonValue::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wildcard_receives_original_event() {
        let emitter = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        emitter
            .on(WILDCARD, "spy", move |event, _| {
                seen_clone.lock().unwrap().push(event.to_string());
                Ok(())
            })
            .unwrap();

        emitter.trigger("collection_create", &JsonValue::Null);
        emitter.trigger("document_update", &JsonValue::Null);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["collection_create", "document_update"]
        );
    }

    #[test]
    fn test_listener_failure_routes_to_error_channel() {
        let emitter = Emitter::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        emitter
            .on(ERROR_EVENT, "sink", move |_, payload| {
                errors_clone.lock().unwrap().push(payload.clone());
                Ok(())
            })
            .unwrap();
        emitter
            .on("x", "bad", |_, _| Err(StrataError::internal("boom")))
            .unwrap();

        // The failure never reaches the triggerer.
        emitter.trigger("x", &JsonValue::Null);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["event"], "x");
        assert_eq!(errors[0]["listener"], "bad");
    }

    #[tokio::test]
    async fn test_silent_scope() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.on("x", "a", counter_listener(count.clone())).unwrap();
        emitter.on("x", "b", counter_listener(count.clone())).unwrap();

        // Silence one listener by name.
        silent(Some(vec!["a".to_string()]), async {
            emitter.trigger("x", &JsonValue::Null);
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Silence everything.
        silent(None, async {
            emitter.trigger("x", &JsonValue::Null);
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Outside the scope both fire again.
        emitter.trigger("x", &JsonValue::Null);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
