//! Auxiliary property service (C7, §4.6) and the in-memory reference
//! auxprop backend (§11.4), plus the `parseuser` realm split (§11.1).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{SaslError, Status};
use crate::propctx::PropContext;
use crate::security::AuxPropFlags;

/// An auxiliary-property backend: given a canonical user and realm, fills
/// whatever requested properties it can (§4.6, §3 "Auxprop plugin").
pub trait AuxPropPlugin: Send + Sync {
    /// `lookup` is called once per registered plugin by `AuxPropService`,
    /// which has already applied the skip/erase/fetch decision (§4.6,
    /// §11.2) for each requested name; the plugin only fills names it is
    /// actually asked to look at here. Passing `Some(names)` restricts the
    /// lookup to that subset of `ctx`'s requested names.
    fn lookup(
        &self,
        ctx: &mut PropContext,
        user: &str,
        realm: &str,
        names: &[&str],
    ) -> Result<(), SaslError>;
}

/// Runs every registered auxprop plugin against a canonical user, applying
/// the per-property OVERRIDE decision from §4.6/§11.2 before calling each
/// plugin.
///
/// Plugins are held behind a mutex rather than requiring `&mut self` (§9
/// "Global registries"): the service is shared as an `Arc` across every
/// connection from `server_init` onward, so an application registering an
/// auxprop backend after `server_init` has already run needs to mutate it
/// through a shared reference, the same way `MechanismRegistry` does.
pub struct AuxPropService {
    plugins: Mutex<Vec<Box<dyn AuxPropPlugin>>>,
}

impl AuxPropService {
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, plugin: Box<dyn AuxPropPlugin>) {
        self.plugins.lock().unwrap().push(plugin);
    }

    /// Walk every registered plugin, in registration order, over every
    /// requested property in `ctx` (§4.6, §11.2):
    ///   - already filled and `OVERRIDE` unset → skip;
    ///   - already filled and `OVERRIDE` set → erase, then fetch;
    ///   - not filled → fetch directly.
    pub fn lookup(
        &self,
        ctx: &mut PropContext,
        flags: AuxPropFlags,
        user: &str,
        realm: &str,
    ) -> Result<(), SaslError> {
        let requested: Vec<String> = ctx.requested_names().map(|s| s.to_string()).collect();
        let plugins = self.plugins.lock().unwrap();
        for plugin in plugins.iter() {
            let mut to_fetch: Vec<&str> = Vec::new();
            for name in &requested {
                if ctx.is_filled(name) {
                    if flags.contains(AuxPropFlags::OVERRIDE) {
                        ctx.erase(name);
                        to_fetch.push(name.as_str());
                    }
                    // filled + no OVERRIDE: skip this name for this plugin.
                } else {
                    to_fetch.push(name.as_str());
                }
            }
            if !to_fetch.is_empty() {
                plugin.lookup(ctx, user, realm, &to_fetch)?;
            }
        }
        Ok(())
    }
}

impl Default for AuxPropService {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a `user@realm` identity the way `sasldb.c`'s `parseuser` does
/// (§11.1): split on the *last* `@`; absent an `@`, the realm defaults to
/// `user_realm` if non-empty, else `server_fqdn`. An empty user or empty
/// realm after the split is a protocol error.
pub fn parse_user<'a>(
    input: &'a str,
    user_realm: &'a str,
    server_fqdn: &'a str,
) -> Result<(&'a str, &'a str), SaslError> {
    let (user, realm) = match input.rfind('@') {
        Some(idx) => {
            let user = &input[..idx];
            let realm = &input[idx + 1..];
            (user, realm)
        }
        None => {
            let realm = if !user_realm.is_empty() {
                user_realm
            } else {
                server_fqdn
            };
            (input, realm)
        }
    };
    if user.is_empty() {
        return Err(SaslError::with_detail(Status::BadProt, "empty user in identity"));
    }
    if realm.is_empty() {
        return Err(SaslError::with_detail(Status::BadProt, "empty realm in identity"));
    }
    Ok((user, realm))
}

/// In-memory reference auxprop backend (§11.4): keyed by `(user, realm,
/// property_name)`, the same logical shape as `sasldb.c`'s on-disk
/// `authid\0mech` key without reproducing its file format.
#[derive(Default)]
pub struct MemoryAuxPropStore {
    table: Mutex<HashMap<(String, String, String), Vec<String>>>,
}

impl MemoryAuxPropStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, user: &str, realm: &str, property: &str, values: Vec<String>) {
        self.table
            .lock()
            .unwrap()
            .insert((user.to_string(), realm.to_string(), property.to_string()), values);
    }
}

impl AuxPropPlugin for MemoryAuxPropStore {
    fn lookup(
        &self,
        ctx: &mut PropContext,
        user: &str,
        realm: &str,
        names: &[&str],
    ) -> Result<(), SaslError> {
        let table = self.table.lock().unwrap();
        for name in names {
            if let Some(values) = table.get(&(user.to_string(), realm.to_string(), (*name).to_string())) {
                ctx.set(name, values.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_user_splits_on_last_at() {
        let (user, realm) = parse_user("alice@sub@example.com", "", "fqdn").unwrap();
        assert_eq!(user, "alice@sub");
        assert_eq!(realm, "example.com");
    }

    #[test]
    fn parse_user_without_at_uses_user_realm() {
        let (user, realm) = parse_user("alice", "configured-realm", "fqdn").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(realm, "configured-realm");
    }

    #[test]
    fn parse_user_without_at_or_user_realm_uses_fqdn() {
        let (user, realm) = parse_user("alice", "", "imap.example.com").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(realm, "imap.example.com");
    }

    #[test]
    fn parse_user_rejects_empty_user() {
        assert!(parse_user("@example.com", "", "fqdn").is_err());
    }

    #[test]
    fn parse_user_rejects_empty_realm() {
        assert!(parse_user("alice@", "", "fqdn").is_err());
    }

    #[test]
    fn auxprop_lookup_fetches_unfilled_properties() {
        let store = MemoryAuxPropStore::new();
        store.set("alice", "example.com", "userPassword", vec!["hunter2".into()]);
        let service = AuxPropService::new();
        service.register(Box::new(store));

        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        service
            .lookup(&mut ctx, AuxPropFlags::empty(), "alice", "example.com")
            .unwrap();
        assert_eq!(ctx.get("userPassword"), Some(&["hunter2".to_string()][..]));
    }

    #[test]
    fn auxprop_lookup_skips_already_filled_without_override() {
        let store = MemoryAuxPropStore::new();
        store.set("alice", "example.com", "userPassword", vec!["from-store".into()]);
        let service = AuxPropService::new();
        service.register(Box::new(store));

        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        ctx.set("userPassword", vec!["pre-filled".into()]).unwrap();
        service
            .lookup(&mut ctx, AuxPropFlags::empty(), "alice", "example.com")
            .unwrap();
        assert_eq!(ctx.get("userPassword"), Some(&["pre-filled".to_string()][..]));
    }

    #[test]
    fn auxprop_lookup_overrides_when_flag_set() {
        let store = MemoryAuxPropStore::new();
        store.set("alice", "example.com", "userPassword", vec!["from-store".into()]);
        let service = AuxPropService::new();
        service.register(Box::new(store));

        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        ctx.set("userPassword", vec!["pre-filled".into()]).unwrap();
        service
            .lookup(&mut ctx, AuxPropFlags::OVERRIDE, "alice", "example.com")
            .unwrap();
        assert_eq!(ctx.get("userPassword"), Some(&["from-store".to_string()][..]));
    }

    #[test]
    fn auxprop_plugin_cannot_set_unrequested_property() {
        struct Rogue;
        impl AuxPropPlugin for Rogue {
            fn lookup(
                &self,
                ctx: &mut PropContext,
                _user: &str,
                _realm: &str,
                _names: &[&str],
            ) -> Result<(), SaslError> {
                ctx.set("mailbox", vec!["INBOX".into()])
            }
        }
        let service = AuxPropService::new();
        service.register(Box::new(Rogue));
        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        let result = service.lookup(&mut ctx, AuxPropFlags::empty(), "alice", "example.com");
        assert!(result.is_err());
    }
}
