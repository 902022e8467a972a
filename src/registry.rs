//! Mechanism registries (C3) and `listmech` (C10), §4.2.
//!
//! Replaces the source's linked-list mechanism storage with an ordered
//! container that preserves insertion order (that order is what `listmech`
//! advertises), with case-insensitive lookup by name (§9 "Linked-list
//! mechanism storage").

use std::sync::{Arc, Mutex};

use crate::conn::ServerConn;
use crate::error::{SaslError, Status};
use crate::mechanism::{MechanismPolicy, ServerMechanism};
use crate::security::{SecurityFlags, SecurityProperties};

/// An insertion-ordered, mutex-guarded registry of mechanism descriptors,
/// generic over the server/client descriptor trait object (§4.2, §9
/// "Global registries"). Duplicate registration (same case-insensitive
/// name) replaces the earlier entry in place (last-wins, §4.2) — its
/// library handle, if any, is released by the plugin loader's `done`
/// teardown, not here.
pub struct MechanismRegistry<M: ?Sized + MechanismPolicy> {
    entries: Mutex<Vec<Arc<M>>>,
}

impl<M: ?Sized + MechanismPolicy> MechanismRegistry<M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register (or replace, last-wins) a mechanism descriptor.
    pub fn register(&self, mech: Arc<M>) {
        let mut entries = self.entries.lock().unwrap();
        let name = mech.name().to_ascii_uppercase();
        if let Some(slot) = entries
            .iter()
            .position(|m| m.name().to_ascii_uppercase() == name)
        {
            entries[slot] = mech;
        } else {
            entries.push(mech);
        }
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<Arc<M>> {
        let needle = name.to_ascii_uppercase();
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.name().to_ascii_uppercase() == needle)
            .cloned()
    }

    /// All registered mechanisms, in registration order.
    pub fn all(&self) -> Vec<Arc<M>> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: ?Sized + MechanismPolicy> Default for MechanismRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The bitset policy test shared by `listmech` (§4.2 step 2) and
/// `server_start`/`client_start`'s mechanism-selection policy check (§4.3):
/// true iff every one of the caller's required security flags is honored
/// by the mechanism and its SSF range intersects the caller's.
///
/// Takes the raw descriptor fields rather than `&dyn MechanismPolicy` so it
/// can be called directly against a `&dyn ServerMechanism` / `&dyn
/// ClientMechanism` trait object — those supertrait methods are always
/// callable on the subtrait object, without needing to coerce the trait
/// object itself to `&dyn MechanismPolicy`.
pub fn mechanism_allowed(max_ssf: u32, min_ssf: u32, mech_flags: SecurityFlags, props: &SecurityProperties) -> bool {
    if max_ssf < props.min_ssf {
        return false;
    }
    if min_ssf > props.max_ssf {
        return false;
    }
    let required = [
        SecurityFlags::NOPLAINTEXT,
        SecurityFlags::NOACTIVE,
        SecurityFlags::NODICTIONARY,
        SecurityFlags::MUTUAL_AUTH,
        SecurityFlags::FORWARD_SECRECY,
        SecurityFlags::NOANONYMOUS,
    ];
    for flag in required {
        if props.security_flags.contains(flag) && !mech_flags.contains(flag) {
            return false;
        }
    }
    true
}

/// Produces the offered-mechanisms string (§4.2 `listmech`): mechanisms
/// from `registry` filtered by `props` (and by `mech_avail`, if the
/// descriptor defines one), joined by `sep`. The open-question bug in the
/// original (§9) is resolved here: names are collected into an ordered
/// `Vec` *before* joining, so `sep` only ever appears between two names
/// that both survived the filter.
pub fn list_mechanisms(
    registry: &MechanismRegistry<dyn ServerMechanism>,
    conn: &ServerConn,
    user: Option<&str>,
    prefix: &str,
    sep: &str,
    suffix: &str,
) -> Result<String, SaslError> {
    let props = &conn.core.security_properties;
    let included: Vec<String> = registry
        .all()
        .into_iter()
        .filter(|m| mechanism_allowed(m.max_ssf(), m.min_ssf(), m.security_flags(), props))
        .filter(|m| m.is_available(conn, user))
        .map(|m| m.name().to_string())
        .collect();

    if included.is_empty() {
        return Err(SaslError::new(Status::NoMech));
    }

    Ok(format!("{}{}{}", prefix, included.join(sep), suffix))
}
