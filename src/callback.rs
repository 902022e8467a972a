//! Callback ids and the resolver (C4): conn-local list → app-global list →
//! framework built-ins (§4.4).

use std::sync::Arc;

use crate::error::Status;

/// Callback domains recognized by the framework (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackId {
    GetOpt,
    Log,
    GetPath,
    VerifyFile,
    User,
    AuthName,
    Pass,
    EchoPrompt,
    NoEchoPrompt,
    GetRealm,
    ProxyPolicy,
    CanonUser,
}

/// A value an application callback can hand back to a mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackValue {
    Text(String),
    Secret(Vec<u8>),
    Bool(bool),
}

impl CallbackValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CallbackValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&[u8]> {
        match self {
            CallbackValue::Secret(b) => Some(b),
            _ => None,
        }
    }
}

/// A callback is anything that can answer a lookup for its id, given a
/// free-form prompt/challenge and an optional default.
pub trait CallbackProc: Send + Sync {
    fn call(&self, id: CallbackId, prompt: &str, default: Option<&str>) -> CallbackResult;
}

pub enum CallbackResult {
    /// The callback produced a value synchronously.
    Value(CallbackValue),
    /// The callback cannot answer without interactive user input; the
    /// caller should fall through to an `INTERACT` prompt (client only).
    NeedsInteraction,
    /// The callback explicitly declined or errored.
    Error(Status),
}

/// One entry in a connection's or application's callback list.
#[derive(Clone)]
pub struct CallbackEntry {
    pub id: CallbackId,
    pub proc: Arc<dyn CallbackProc>,
}

impl CallbackEntry {
    pub fn new(id: CallbackId, proc: Arc<dyn CallbackProc>) -> Self {
        Self { id, proc }
    }
}

/// An ordered, immutable callback list (§4.4 "lists are terminated by a
/// sentinel id" — here, simply the end of the `Vec`).
#[derive(Clone, Default)]
pub struct CallbackList {
    entries: Vec<CallbackEntry>,
}

impl CallbackList {
    pub fn new(entries: Vec<CallbackEntry>) -> Self {
        Self { entries }
    }

    pub fn find(&self, id: CallbackId) -> Option<&CallbackEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Resolves a callback id against conn-local, then app-global, then
/// framework built-in providers (§4.4). Resolution reads only immutable
/// lists, so it is lock-free per the thread-safety note.
pub struct CallbackResolver<'a> {
    pub conn_local: &'a CallbackList,
    pub app_global: &'a CallbackList,
}

impl<'a> CallbackResolver<'a> {
    pub fn new(conn_local: &'a CallbackList, app_global: &'a CallbackList) -> Self {
        Self {
            conn_local,
            app_global,
        }
    }

    /// Returns the first matching callback: conn-local wins over app-global.
    /// Framework built-ins (LOG/GETOPT/GETPATH/VERIFYFILE defaults) are not
    /// representable as a `CallbackProc` here — they are applied by the
    /// caller when this returns `None` for one of those four ids, per §4.4.
    pub fn resolve(&self, id: CallbackId) -> Option<&CallbackEntry> {
        self.conn_local.find(id).or_else(|| self.app_global.find(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(CallbackValue);
    impl CallbackProc for Fixed {
        fn call(&self, _id: CallbackId, _prompt: &str, _default: Option<&str>) -> CallbackResult {
            CallbackResult::Value(self.0.clone())
        }
    }

    #[test]
    fn conn_local_wins_over_app_global() {
        let conn_local = CallbackList::new(vec![CallbackEntry::new(
            CallbackId::User,
            Arc::new(Fixed(CallbackValue::Text("conn-alice".into()))),
        )]);
        let app_global = CallbackList::new(vec![CallbackEntry::new(
            CallbackId::User,
            Arc::new(Fixed(CallbackValue::Text("app-bob".into()))),
        )]);
        let resolver = CallbackResolver::new(&conn_local, &app_global);
        let entry = resolver.resolve(CallbackId::User).unwrap();
        match entry.proc.call(CallbackId::User, "", None) {
            CallbackResult::Value(CallbackValue::Text(s)) => assert_eq!(s, "conn-alice"),
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn falls_through_to_app_global_when_conn_local_absent() {
        let conn_local = CallbackList::default();
        let app_global = CallbackList::new(vec![CallbackEntry::new(
            CallbackId::Pass,
            Arc::new(Fixed(CallbackValue::Secret(b"hunter2".to_vec()))),
        )]);
        let resolver = CallbackResolver::new(&conn_local, &app_global);
        assert!(resolver.resolve(CallbackId::Pass).is_some());
        assert!(resolver.resolve(CallbackId::User).is_none());
    }
}
