//! Core SASL framework (§1-§9): mechanism registry, session state machine,
//! callback resolution, canonicalization, auxiliary properties, and the
//! post-authentication security layer. Concrete mechanisms beyond the
//! small reference set (`builtin`) are discovered at runtime through the
//! plugin loader (`plugin`).
//!
//! This module is the facade: global lifecycle (`server_init`/
//! `client_init`/`done`) plus the entry points a server or client
//! application drives a session through (§6 External Interfaces).

pub mod auxprop;
pub mod builtin;
pub mod callback;
pub mod canon;
pub mod config;
pub mod conn;
pub mod error;
pub mod log;
pub mod mechanism;
pub mod plugin;
pub mod propctx;
pub mod registry;
pub mod security;
pub mod security_layer;
pub mod session;

use std::sync::{Arc, Mutex};

use log::Level;

use crate::auxprop::AuxPropService;
use crate::builtin::external::ExternalServerMechanism;
use crate::builtin::plain::PlainVerifier;
use crate::callback::CallbackList;
use crate::canon::CanonService;
use crate::config::FrameworkConfig;
use crate::conn::{ClientConn, ConnCore, ServerConn};
use crate::error::{SaslError, Status};
use crate::log::{Log, LogMode};
use crate::mechanism::{ClientMechanism, PromptAnswer, ServerMechanism};
use crate::propctx::PropContext;
use crate::registry::MechanismRegistry;
use crate::security::AuxPropFlags;
use crate::session::{ClientStart, SessionResult};

/// Everything a server-side application needs once `server_init` has run:
/// the mechanism registry, the auxprop and canon services shared by every
/// connection, and the framework's default logger (§4.4 LOG default).
pub struct ServerGlobals {
    pub registry: MechanismRegistry<dyn ServerMechanism>,
    pub auxprop: Arc<AuxPropService>,
    pub canon: Arc<CanonService>,
    pub logger: Log,
    /// The app-global callback list passed to `server_init` (§4.4's
    /// "app-global list, captured at init").
    pub callbacks: CallbackList,
}

/// Mirrors [`ServerGlobals`] for the client side (no auxprop on the client).
pub struct ClientGlobals {
    pub registry: MechanismRegistry<dyn ClientMechanism>,
    pub canon: Arc<CanonService>,
    pub logger: Log,
    pub callbacks: CallbackList,
}

static SERVER_GLOBALS: Mutex<Option<Arc<ServerGlobals>>> = Mutex::new(None);
static CLIENT_GLOBALS: Mutex<Option<Arc<ClientGlobals>>> = Mutex::new(None);

/// `server_init` (§6, §3 Lifecycles): idempotent — a second call while
/// already initialized is a no-op success, matching the original's
/// "init twice is fine" contract. `callbacks` is the app-global list
/// (§4.4) consulted for GETPATH/VERIFYFILE while loading plugins, and
/// for every other callback id a connection doesn't answer itself.
pub fn server_init(app_name: &str, callbacks: CallbackList) -> Result<(), SaslError> {
    let mut slot = SERVER_GLOBALS.lock().unwrap();
    if slot.is_some() {
        return Ok(());
    }
    FrameworkConfig::init()?;
    let cfg = FrameworkConfig::get();

    let registry: MechanismRegistry<dyn ServerMechanism> = MechanismRegistry::new();
    registry.register(Arc::new(ExternalServerMechanism));

    let logger = Log::new(LogMode::Immediate);
    plugin::load_server_plugins(&cfg.plugin_path, &callbacks, &registry, &logger);

    *slot = Some(Arc::new(ServerGlobals {
        registry,
        auxprop: Arc::new(AuxPropService::new()),
        canon: Arc::new(CanonService::with_default(cfg.canon_buf_size)),
        logger,
        callbacks,
    }));
    let _ = app_name;
    Ok(())
}

/// `client_init` (§6), mirroring [`server_init`].
pub fn client_init(app_name: &str, callbacks: CallbackList) -> Result<(), SaslError> {
    let mut slot = CLIENT_GLOBALS.lock().unwrap();
    if slot.is_some() {
        return Ok(());
    }
    FrameworkConfig::init()?;
    let cfg = FrameworkConfig::get();

    let registry: MechanismRegistry<dyn ClientMechanism> = MechanismRegistry::new();
    registry.register(Arc::new(crate::builtin::external::ExternalClientMechanism::new()));

    let logger = Log::new(LogMode::Immediate);
    plugin::load_client_plugins(&cfg.plugin_path, &callbacks, &registry, &logger);

    *slot = Some(Arc::new(ClientGlobals {
        registry,
        canon: Arc::new(CanonService::with_default(cfg.canon_buf_size)),
        logger,
        callbacks,
    }));
    let _ = app_name;
    Ok(())
}

/// `done` (§6, §3 Lifecycles): tears down both the server and client
/// globals. A subsequent `server_init`/`client_init` starts fresh.
pub fn done() {
    *SERVER_GLOBALS.lock().unwrap() = None;
    *CLIENT_GLOBALS.lock().unwrap() = None;
}

pub fn server_globals() -> Result<Arc<ServerGlobals>, SaslError> {
    SERVER_GLOBALS
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| SaslError::with_detail(Status::NotInit, "server_init was not called"))
}

pub fn client_globals() -> Result<Arc<ClientGlobals>, SaslError> {
    CLIENT_GLOBALS
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| SaslError::with_detail(Status::NotInit, "client_init was not called"))
}

/// Adds a mechanism descriptor to the global server registry (the way an
/// application installs PLAIN/LOGIN with its own credential source, or a
/// mechanism it built in-process rather than via the plugin loader).
pub fn register_server_mechanism(mech: Arc<dyn ServerMechanism>) -> Result<(), SaslError> {
    server_globals()?.registry.register(mech);
    Ok(())
}

pub fn register_client_mechanism(mech: Arc<dyn ClientMechanism>) -> Result<(), SaslError> {
    client_globals()?.registry.register(mech);
    Ok(())
}

/// Adds a backend to the global auxprop service (C7, §4.6) — e.g. an
/// application-supplied `AuxPropPlugin` wrapping its own user database, or
/// the crate's reference [`crate::auxprop::MemoryAuxPropStore`] for tests.
pub fn register_auxprop_plugin(plugin: Box<dyn crate::auxprop::AuxPropPlugin>) -> Result<(), SaslError> {
    server_globals()?.auxprop.register(plugin);
    Ok(())
}

/// Appends a pluggable canonicalizer (C6, §4.5) to the global server
/// registry's canon chain, run after the built-in default.
pub fn register_server_canonicalizer(canon: Box<dyn crate::canon::Canonicalizer>) -> Result<(), SaslError> {
    server_globals()?.canon.push(canon);
    Ok(())
}

/// Mirrors [`register_server_canonicalizer`] for the client side.
pub fn register_client_canonicalizer(canon: Box<dyn crate::canon::Canonicalizer>) -> Result<(), SaslError> {
    client_globals()?.canon.push(canon);
    Ok(())
}

/// A [`PlainVerifier`] backed by the global auxprop service's `userPassword`
/// property (§4.6, §11.4) — the general-purpose credential source for
/// PLAIN/LOGIN, as opposed to [`crate::builtin::plain::InMemoryVerifier`]'s
/// fixed table.
struct AuxPropVerifier {
    realm: String,
}

impl PlainVerifier for AuxPropVerifier {
    fn verify(&self, authid: &str, password: &[u8]) -> Result<bool, SaslError> {
        let globals = server_globals()?;
        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        globals
            .auxprop
            .lookup(&mut ctx, AuxPropFlags::empty(), authid, &self.realm)?;
        Ok(matches!(
            ctx.get("userPassword"),
            Some(values) if values.iter().any(|v| v.as_bytes() == password)
        ))
    }
}

/// Builds a verifier that checks credentials against the global auxprop
/// service for the given realm, for use with
/// [`crate::builtin::plain::PlainServerMechanism::new`] or
/// [`crate::builtin::login::LoginServerMechanism::new`].
pub fn auxprop_verifier(realm: impl Into<String>) -> Arc<dyn PlainVerifier> {
    Arc::new(AuxPropVerifier { realm: realm.into() })
}

/// `server_new` (§6): builds a connection sharing the global canon/auxprop
/// services.
pub fn server_new(
    service: impl Into<String>,
    server_fqdn: impl Into<String>,
    user_realm: impl Into<String>,
    callbacks: CallbackList,
) -> Result<ServerConn, SaslError> {
    let globals = server_globals()?;
    ServerConn::new(
        service,
        server_fqdn,
        user_realm,
        callbacks,
        globals.canon.clone(),
        globals.auxprop.clone(),
    )
}

/// `client_new` (§6).
pub fn client_new(
    service: impl Into<String>,
    server_fqdn: impl Into<String>,
    callbacks: CallbackList,
) -> Result<ClientConn, SaslError> {
    let globals = client_globals()?;
    ClientConn::new(service, server_fqdn, callbacks, globals.canon.clone())
}

/// `server_start` (§6), resolving the mechanism against the global registry.
pub fn server_start(conn: &ServerConn, mech_name: &str, client_initial_token: &[u8]) -> SessionResult {
    let globals = server_globals()?;
    session::server_start(conn, &globals.registry, mech_name, client_initial_token)
}

/// `server_step` (§6).
pub fn server_step(conn: &ServerConn, client_token: &[u8]) -> SessionResult {
    session::server_step(conn, client_token)
}

/// `client_start` (§6).
pub fn client_start(
    conn: &ClientConn,
    server_mech_list: &str,
    prompt_answers: &[PromptAnswer],
) -> Result<ClientStart, SaslError> {
    let globals = client_globals()?;
    session::client_start(conn, &globals.registry, server_mech_list, prompt_answers)
}

/// `client_step` (§6).
pub fn client_step(conn: &ClientConn, server_token: &[u8], prompt_answers: &[PromptAnswer]) -> SessionResult {
    session::client_step(conn, server_token, prompt_answers)
}

/// `listmech` (§6, §4.2): offered mechanisms for the given connection's
/// security policy.
pub fn listmech(
    conn: &ServerConn,
    user: Option<&str>,
    prefix: &str,
    sep: &str,
    suffix: &str,
) -> Result<String, SaslError> {
    let globals = server_globals()?;
    registry::list_mechanisms(&globals.registry, conn, user, prefix, sep, suffix)
}

/// `checkpass` (§6): verifies a plaintext credential directly against the
/// global auxprop service, independent of any mechanism exchange — the
/// same role `sasl_checkpass` plays for APOP-style or pre-authenticated
/// protocols.
pub fn checkpass(conn: &ServerConn, user: &str, pass: &[u8]) -> Result<(), SaslError> {
    let globals = server_globals()?;
    let mut ctx = PropContext::new();
    ctx.request(&["userPassword"]);
    globals
        .auxprop
        .lookup(&mut ctx, AuxPropFlags::empty(), user, &conn.user_realm)?;
    match ctx.get("userPassword") {
        Some(values) if values.iter().any(|v| v.as_bytes() == pass) => Ok(()),
        Some(_) => Err(SaslError::new(Status::BadAuth)),
        None => Err(SaslError::new(Status::NoUser)),
    }
}

/// `userexists` (§6).
pub fn userexists(conn: &ServerConn, user: &str) -> Result<(), SaslError> {
    let globals = server_globals()?;
    let mut ctx = PropContext::new();
    ctx.request(&["userPassword"]);
    globals
        .auxprop
        .lookup(&mut ctx, AuxPropFlags::empty(), user, &conn.user_realm)?;
    if ctx.is_filled("userPassword") {
        Ok(())
    } else {
        Err(SaslError::new(Status::NoUser))
    }
}

/// `setpass` (§6, §11.3): the `_sasl_transition` resolution.
pub fn setpass(user: &str, new_pass: &[u8]) -> Result<(), SaslError> {
    let globals = server_globals()?;
    session::transition(&globals.registry, &globals.logger, user, new_pass)
}

/// `encode` (§6, §4.7): requires a completed exchange that negotiated
/// `mech_ssf > 0`; calling this on a failed or uncompleted conn is
/// `BADPARAM` (§7 "User-visible behavior").
pub fn encode(core: &ConnCore, iov: &[&[u8]]) -> Result<Vec<u8>, SaslError> {
    let mut layer = core.security_layer.lock().unwrap();
    match layer.as_mut() {
        Some(layer) => Ok(layer.encode(iov)?.to_vec()),
        None => Err(SaslError::new(Status::BadParam)),
    }
}

/// `decode` (§6, §4.7): same precondition as `encode`.
pub fn decode(core: &ConnCore, input: &[u8]) -> Result<Vec<u8>, SaslError> {
    let mut layer = core.security_layer.lock().unwrap();
    match layer.as_mut() {
        Some(layer) => Ok(layer.decode(input)?.to_vec()),
        None => Err(SaslError::new(Status::BadParam)),
    }
}

/// `errdetail` (§6).
pub fn errdetail(core: &ConnCore) -> Option<String> {
    core.error_detail()
}

/// `errstring` (§6): the fixed, language-independent message for a status
/// code (`Status` already carries this via its `Display` impl).
pub fn errstring(status: Status) -> String {
    status.to_string()
}

/// `seterror` (§6): latches an error with a caller-supplied detail string,
/// e.g. from a callback that failed for an application-specific reason.
pub fn seterror(core: &ConnCore, status: Status, detail: impl Into<String>) {
    core.latch_error(&SaslError::with_detail(status, detail.into()));
}

/// Logs at `info` through the server globals' logger — the built-in LOG
/// callback default (§4.4) when no conn-local/app-global LOG callback is
/// registered.
pub fn log_info(msg: impl std::fmt::Display) {
    if let Ok(globals) = server_globals() {
        globals.logger.write(Level::Info, msg);
    }
}
