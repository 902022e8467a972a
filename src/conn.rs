//! Connection object (C8, §3): common session state, specialized into
//! `ServerConn`/`ClientConn`.

use std::sync::{Arc, Mutex};

use crate::callback::CallbackList;
use crate::canon::CanonService;
use crate::auxprop::AuxPropService;
use crate::error::{ErrorChannel, SaslError};
use crate::mechanism::{MechOutParams, ServerMechanismInstance};
use crate::security::{ConnFlags, SecurityProperties};
use crate::security_layer::SecurityLayer;

/// Credentials asserted by the transport layer (TLS, etc.), §3 `external`.
#[derive(Debug, Clone, Default)]
pub struct ExternalProperties {
    pub ssf: u32,
    pub auth_id: Option<String>,
}

/// A `host;port` endpoint hint used by channel-binding-aware mechanisms.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{}", self.host, self.port)
    }
}

/// State and behavior common to both `ServerConn` and `ClientConn` (§3
/// "Connection (sum of variants Server | Client)").
pub struct ConnCore {
    pub service: String,
    pub flags: ConnFlags,
    pub local_endpoint: Option<Endpoint>,
    pub remote_endpoint: Option<Endpoint>,
    pub security_properties: SecurityProperties,
    pub external: ExternalProperties,
    pub callbacks: CallbackList,
    pub errors: Mutex<ErrorChannel>,
    pub out_params: Mutex<MechOutParams>,
    pub done_flag: Mutex<bool>,
    pub security_layer: Mutex<Option<SecurityLayer>>,
}

impl ConnCore {
    pub fn new(service: impl Into<String>, callbacks: CallbackList) -> Result<Self, SaslError> {
        let service = service.into();
        if service.is_empty() || !service.is_ascii() {
            return Err(SaslError::new(crate::error::Status::BadParam));
        }
        Ok(Self {
            service,
            flags: ConnFlags::empty(),
            local_endpoint: None,
            remote_endpoint: None,
            security_properties: SecurityProperties::default(),
            external: ExternalProperties::default(),
            callbacks,
            errors: Mutex::new(ErrorChannel::default()),
            out_params: Mutex::new(MechOutParams::default()),
            done_flag: Mutex::new(false),
            security_layer: Mutex::new(None),
        })
    }

    /// Latches an error per the error-latching rule (§3, §5, §8): the first
    /// error is stored and a later success never clears it.
    pub fn latch_error(&self, err: &SaslError) {
        self.errors.lock().unwrap().latch(err);
    }

    pub fn error_status(&self) -> crate::error::Status {
        self.errors.lock().unwrap().status()
    }

    pub fn error_detail(&self) -> Option<String> {
        self.errors.lock().unwrap().detail().map(str::to_string)
    }

    pub fn is_done(&self) -> bool {
        *self.done_flag.lock().unwrap()
    }

    pub fn mark_done(&self) {
        *self.done_flag.lock().unwrap() = true;
    }
}

/// Mechanism selection/session-machine state, shared by the `selected_mech`
/// + `mech_context` pair in §3.
pub(crate) enum SessionState<I> {
    Idle,
    Running {
        mech_name: String,
        instance: I,
    },
    /// See §4.3 "Send last" rule: the mechanism already returned `OK` with
    /// a non-empty final token, but the application does not allow success
    /// data, so the framework suppressed it and is waiting for one more
    /// (empty) round-trip before reporting `OK` itself.
    Draining { mech_name: String },
    Complete { mech_name: String },
    Failed,
}

/// Server-side connection (§3, §6 `server_new`).
pub struct ServerConn {
    pub core: ConnCore,
    pub(crate) state: Mutex<SessionState<Box<dyn ServerMechanismInstance>>>,
    pub canon: Arc<CanonService>,
    pub auxprop: Arc<AuxPropService>,
    pub user_realm: String,
    pub server_fqdn: String,
}

impl ServerConn {
    pub fn new(
        service: impl Into<String>,
        server_fqdn: impl Into<String>,
        user_realm: impl Into<String>,
        callbacks: CallbackList,
        canon: Arc<CanonService>,
        auxprop: Arc<AuxPropService>,
    ) -> Result<Self, SaslError> {
        Ok(Self {
            core: ConnCore::new(service, callbacks)?,
            state: Mutex::new(SessionState::Idle),
            canon,
            auxprop,
            user_realm: user_realm.into(),
            server_fqdn: server_fqdn.into(),
        })
    }
}

/// Client-side connection (§3, §6 `client_new`).
pub struct ClientConn {
    pub core: ConnCore,
    pub(crate) state: Mutex<SessionState<Box<dyn crate::mechanism::ClientMechanismInstance>>>,
    pub canon: Arc<CanonService>,
    pub server_fqdn: String,
    /// Retained prompt list across an `INTERACT` round-trip (§4.3, §9
    /// "Prompt list reuse"): identity must be preserved across retries.
    pub(crate) pending_prompts: Mutex<Option<Vec<crate::mechanism::Prompt>>>,
}

impl ClientConn {
    pub fn new(
        service: impl Into<String>,
        server_fqdn: impl Into<String>,
        callbacks: CallbackList,
        canon: Arc<CanonService>,
    ) -> Result<Self, SaslError> {
        Ok(Self {
            core: ConnCore::new(service, callbacks)?,
            state: Mutex::new(SessionState::Idle),
            canon,
            server_fqdn: server_fqdn.into(),
            pending_prompts: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_service_name_is_rejected() {
        let result = ConnCore::new("", CallbackList::default());
        assert!(result.is_err());
    }

    #[test]
    fn fresh_conn_has_no_latched_error() {
        let core = ConnCore::new("imap", CallbackList::default()).unwrap();
        assert_eq!(core.error_status(), crate::error::Status::Ok);
        assert!(!core.is_done());
    }

    #[test]
    fn error_latches_and_survives_a_later_success_path() {
        let core = ConnCore::new("imap", CallbackList::default()).unwrap();
        core.latch_error(&SaslError::new(crate::error::Status::BadAuth));
        assert_eq!(core.error_status(), crate::error::Status::BadAuth);
        // There is no "clear on success" operation by design; the only way
        // to change the status is another latch() call with an error.
        assert_eq!(core.error_status(), crate::error::Status::BadAuth);
    }
}
