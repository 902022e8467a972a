//! Session state machine (C9, §4.3): `start` → repeated `step` → `complete`,
//! for both the server and client side of an exchange.

use log::Level;

use crate::conn::{ClientConn, ServerConn, SessionState};
use crate::error::{SaslError, Status};
use crate::mechanism::{
    ClientMechanism, MechOutParams, Prompt, PromptAnswer, ServerMechanism, StepOutcome,
};
use crate::registry::{mechanism_allowed, MechanismRegistry};

/// Non-error outcome of a server or client step (§9 "Prompt list reuse").
pub enum SessionOutcome {
    /// More protocol round-trips are needed; carries the token to send.
    Continue(Vec<u8>),
    /// The exchange is complete; carries the final token to send (possibly
    /// empty).
    Ok(Vec<u8>),
    /// Client only: the application must fill these prompts and retry with
    /// the same list (§4.3).
    Interact(Vec<Prompt>),
}

pub type SessionResult = Result<SessionOutcome, SaslError>;

fn latch_and_fail<I>(conn_errors: &crate::conn::ConnCore, state: &mut SessionState<I>, err: SaslError) -> SaslError {
    conn_errors.latch_error(&err);
    *state = SessionState::Failed;
    err
}

/// Runs the §4.3 completion pipeline once a mechanism reports `OK`:
/// 1. verify `authid` non-empty,
/// 2. canonicalize authid (and authzid if present),
/// 3. install the security layer if the mechanism negotiated one,
/// 4. mark `done_flag`.
fn complete_server(conn: &ServerConn, mut out: MechOutParams) -> Result<(), SaslError> {
    let authid = out
        .authid
        .clone()
        .ok_or_else(|| SaslError::new(Status::BadAuth))?;
    if authid.is_empty() {
        return Err(SaslError::new(Status::BadAuth));
    }
    let canon_authid = conn
        .canon
        .canonicalize(&authid, crate::security::CanonFlags::AUTHID)?;
    let canon_authzid = match &out.authzid {
        Some(z) if !z.is_empty() => Some(
            conn.canon
                .canonicalize(z, crate::security::CanonFlags::AUTHZID)?,
        ),
        _ => None,
    };
    out.authid = Some(canon_authid.clone());
    out.user = Some(canon_authzid.unwrap_or(canon_authid));

    // mech_ssf > 0 => encode/decode non-null (§3 invariant). Reference
    // mechanisms never negotiate ssf > 0 (§12); a future mechanism that
    // does would install a `SecurityLayer` into `conn.core.security_layer`
    // here, from out.encode/out.decode equivalents.
    *conn.core.out_params.lock().unwrap() = out;
    conn.core.mark_done();
    Ok(())
}

/// Unlike `complete_server`, a non-empty `authid` is not required here: a
/// mechanism like EXTERNAL deliberately leaves the client's `authid` unset
/// because the identity is determined by the transport and only the server
/// side of the exchange ever learns it (§12). The §8 "non-empty authid"
/// invariant binds `server_start`'s out-params, not the client's.
fn complete_client(conn: &ClientConn, mut out: MechOutParams) -> Result<(), SaslError> {
    if let Some(authid) = out.authid.clone() {
        if authid.is_empty() {
            return Err(SaslError::new(Status::BadAuth));
        }
        let canon_authid = conn
            .canon
            .canonicalize(&authid, crate::security::CanonFlags::AUTHID)?;
        let canon_authzid = match &out.authzid {
            Some(z) if !z.is_empty() => Some(
                conn.canon
                    .canonicalize(z, crate::security::CanonFlags::AUTHZID)?,
            ),
            _ => None,
        };
        out.authid = Some(canon_authid.clone());
        out.user = Some(canon_authzid.unwrap_or(canon_authid));
    } else if let Some(z) = out.authzid.clone().filter(|z| !z.is_empty()) {
        let canon_authzid = conn
            .canon
            .canonicalize(&z, crate::security::CanonFlags::AUTHZID)?;
        out.authzid = Some(canon_authzid.clone());
        out.user = Some(canon_authzid);
    }
    *conn.core.out_params.lock().unwrap() = out;
    conn.core.mark_done();
    Ok(())
}

/// `server_start` (§4.3, §6): case-insensitive lookup, policy check,
/// `mech_new` + first `mech_step`.
pub fn server_start(
    conn: &ServerConn,
    registry: &MechanismRegistry<dyn ServerMechanism>,
    mech_name: &str,
    client_initial_token: &[u8],
) -> SessionResult {
    {
        let state = conn.state.lock().unwrap();
        if !matches!(*state, SessionState::Idle) {
            let err = SaslError::with_detail(Status::BadProt, "start called outside IDLE state");
            conn.core.latch_error(&err);
            return Err(err);
        }
    }

    let mech = match registry.lookup(mech_name) {
        Some(m) => m,
        None => {
            let err = SaslError::with_detail(Status::NoMech, format!("no such mechanism: {}", mech_name));
            conn.core.latch_error(&err);
            return Err(err);
        }
    };

    if !mechanism_allowed(mech.max_ssf(), mech.min_ssf(), mech.security_flags(), &conn.core.security_properties) {
        let err = SaslError::with_detail(Status::TooWeak, format!("{} rejected by security policy", mech_name));
        conn.core.latch_error(&err);
        return Err(err);
    }

    let mut instance = mech.new_instance();
    let outcome = instance.step(conn, client_initial_token);
    let mut state = conn.state.lock().unwrap();
    *state = SessionState::Running {
        mech_name: mech.name().to_string(),
        instance,
    };
    drop(state);
    apply_server_outcome(conn, outcome)
}

/// `server_step` (§4.3): feeds a client token to the stored mechanism
/// instance, or advances a pending drain.
pub fn server_step(conn: &ServerConn, client_token: &[u8]) -> SessionResult {
    let mut state = conn.state.lock().unwrap();
    match &mut *state {
        SessionState::Idle => {
            let err = SaslError::with_detail(Status::BadProt, "step called before start");
            drop(state);
            conn.core.latch_error(&err);
            Err(err)
        }
        SessionState::Failed => Err(SaslError::new(conn.core.error_status())),
        SessionState::Complete { .. } => Err(SaslError::new(Status::NotDone)),
        SessionState::Draining { mech_name } => {
            let mech_name = mech_name.clone();
            *state = SessionState::Complete { mech_name };
            Ok(SessionOutcome::Ok(Vec::new()))
        }
        SessionState::Running { instance, .. } => {
            let outcome = instance.step(conn, client_token);
            drop(state);
            apply_server_outcome(conn, outcome)
        }
    }
}

fn apply_server_outcome(conn: &ServerConn, outcome: StepOutcome) -> SessionResult {
    match outcome {
        StepOutcome::Continue(token) => Ok(SessionOutcome::Continue(token)),
        StepOutcome::Ok(token, out_params) => {
            if let Err(err) = complete_server(conn, out_params) {
                let mut state = conn.state.lock().unwrap();
                return Err(latch_and_fail(&conn.core, &mut *state, err));
            }
            let mut state = conn.state.lock().unwrap();
            let mech_name = match &*state {
                SessionState::Running { mech_name, .. } => mech_name.clone(),
                _ => String::new(),
            };
            let suppress = !token.is_empty()
                && !conn
                    .core
                    .flags
                    .contains(crate::security::ConnFlags::SUCCESS_DATA_ALLOWED);
            if suppress {
                *state = SessionState::Draining { mech_name };
                Ok(SessionOutcome::Continue(token))
            } else {
                *state = SessionState::Complete { mech_name };
                Ok(SessionOutcome::Ok(token))
            }
        }
        StepOutcome::Interact(_) => {
            // Interactive prompting is a client-only control-flow (§4.3).
            let err = SaslError::with_detail(Status::BadProt, "server mechanism returned INTERACT");
            let mut state = conn.state.lock().unwrap();
            Err(latch_and_fail(&conn.core, &mut *state, err))
        }
        StepOutcome::Error(err) => {
            let mut state = conn.state.lock().unwrap();
            Err(latch_and_fail(&conn.core, &mut *state, err))
        }
    }
}

/// Parses a space-separated mechanism list as offered by a server
/// (§4.3 `client_start`).
fn parse_mech_list(list: &str) -> Vec<&str> {
    list.split_whitespace().collect()
}

pub struct ClientStart {
    pub mech_name: String,
    pub outcome: SessionOutcome,
}

/// `client_start` (§4.3): selects the first mechanism, in the *local*
/// registry's preferred order, that both survives the local policy check
/// and appears in the server's offered list.
pub fn client_start(
    conn: &ClientConn,
    registry: &MechanismRegistry<dyn ClientMechanism>,
    server_mech_list: &str,
    prompt_answers: &[PromptAnswer],
) -> Result<ClientStart, SaslError> {
    {
        let state = conn.state.lock().unwrap();
        if !matches!(*state, SessionState::Idle) {
            let err = SaslError::with_detail(Status::BadProt, "start called outside IDLE state");
            conn.core.latch_error(&err);
            return Err(err);
        }
    }

    let offered = parse_mech_list(server_mech_list);
    let selected = registry.all().into_iter().find(|m| {
        offered.iter().any(|o| o.eq_ignore_ascii_case(m.name()))
            && mechanism_allowed(m.max_ssf(), m.min_ssf(), m.security_flags(), &conn.core.security_properties)
    });

    let mech = match selected {
        Some(m) => m,
        None => {
            let err = SaslError::new(Status::NoMech);
            conn.core.latch_error(&err);
            return Err(err);
        }
    };

    let wants_initial = mech
        .features()
        .contains(crate::security::MechFeatures::WANTS_CLIENT_FIRST);

    let mut instance = mech.new_instance();
    if !wants_initial {
        let mut state = conn.state.lock().unwrap();
        *state = SessionState::Running {
            mech_name: mech.name().to_string(),
            instance,
        };
        return Ok(ClientStart {
            mech_name: mech.name().to_string(),
            outcome: SessionOutcome::Continue(Vec::new()),
        });
    }

    let outcome = instance.step(conn, &[], prompt_answers);
    let mut state = conn.state.lock().unwrap();
    *state = SessionState::Running {
        mech_name: mech.name().to_string(),
        instance,
    };
    drop(state);
    let name = mech.name().to_string();
    let session_outcome = apply_client_outcome(conn, outcome)?;
    Ok(ClientStart {
        mech_name: name,
        outcome: session_outcome,
    })
}

/// `client_step` (§4.3): mirrors `server_step`.
pub fn client_step(
    conn: &ClientConn,
    server_token: &[u8],
    prompt_answers: &[PromptAnswer],
) -> SessionResult {
    let mut state = conn.state.lock().unwrap();
    match &mut *state {
        SessionState::Idle => {
            let err = SaslError::with_detail(Status::BadProt, "step called before start");
            drop(state);
            conn.core.latch_error(&err);
            Err(err)
        }
        SessionState::Failed => Err(SaslError::new(conn.core.error_status())),
        SessionState::Complete { .. } => Err(SaslError::new(Status::NotDone)),
        SessionState::Draining { mech_name } => {
            let mech_name = mech_name.clone();
            *state = SessionState::Complete { mech_name };
            Ok(SessionOutcome::Ok(Vec::new()))
        }
        SessionState::Running { instance, .. } => {
            let outcome = instance.step(conn, server_token, prompt_answers);
            drop(state);
            apply_client_outcome(conn, outcome)
        }
    }
}

fn apply_client_outcome(conn: &ClientConn, outcome: StepOutcome) -> SessionResult {
    match outcome {
        StepOutcome::Continue(token) => Ok(SessionOutcome::Continue(token)),
        StepOutcome::Ok(token, out_params) => {
            if let Err(err) = complete_client(conn, out_params) {
                let mut state = conn.state.lock().unwrap();
                return Err(latch_and_fail(&conn.core, &mut *state, err));
            }
            let mut state = conn.state.lock().unwrap();
            let mech_name = match &*state {
                SessionState::Running { mech_name, .. } => mech_name.clone(),
                _ => String::new(),
            };
            *state = SessionState::Complete { mech_name };
            Ok(SessionOutcome::Ok(token))
        }
        StepOutcome::Interact(prompts) => {
            // Preserve prompt list identity across the round-trip (§4.3, §9).
            *conn.pending_prompts.lock().unwrap() = Some(prompts.clone());
            Ok(SessionOutcome::Interact(prompts))
        }
        StepOutcome::Error(err) => {
            let mut state = conn.state.lock().unwrap();
            Err(latch_and_fail(&conn.core, &mut *state, err))
        }
    }
}

/// `_sasl_transition` resolution (§9, §11.3): offers a newly verified
/// plaintext password to every registered mechanism's `setpass` hook.
/// Succeeds if at least one plugin accepts; every rejection is logged at
/// `info` rather than silently dropped.
pub fn transition(
    registry: &MechanismRegistry<dyn ServerMechanism>,
    logger: &crate::log::Log,
    user: &str,
    new_pass: &[u8],
) -> Result<(), SaslError> {
    let mut any_accepted = false;
    for mech in registry.all() {
        match mech.set_pass(user, new_pass) {
            Ok(()) => any_accepted = true,
            Err(err) => logger.write(
                Level::Info,
                format!("setpass transition rejected by {}: {}", mech.name(), err),
            ),
        }
    }
    if any_accepted {
        Ok(())
    } else {
        Err(SaslError::new(Status::NoMech))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::plain::{PlainClientMechanism, PlainServerMechanism};
    use crate::callback::CallbackList;
    use crate::canon::CanonService;
    use crate::auxprop::AuxPropService;
    use std::sync::Arc;

    fn server_conn() -> ServerConn {
        ServerConn::new(
            "imap",
            "imap.example.com",
            "",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
            Arc::new(AuxPropService::new()),
        )
        .unwrap()
    }

    fn client_conn() -> ClientConn {
        ClientConn::new(
            "imap",
            "imap.example.com",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
        )
        .unwrap()
    }

    #[test]
    fn plain_success_end_to_end() {
        let conn = server_conn();
        let registry: MechanismRegistry<dyn ServerMechanism> = MechanismRegistry::new();
        registry.register(Arc::new(PlainServerMechanism::new_in_memory(vec![(
            "alice".to_string(),
            "hunter2".to_string(),
        )])));

        let token = b"\0alice\0hunter2";
        let outcome = server_start(&conn, &registry, "PLAIN", token).unwrap();
        match outcome {
            SessionOutcome::Ok(out_token) => assert!(out_token.is_empty()),
            _ => panic!("expected Ok"),
        }
        assert!(conn.core.is_done());
        assert_eq!(
            conn.core.out_params.lock().unwrap().authid.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn policy_rejects_mechanism_as_too_weak() {
        let mut conn = server_conn();
        conn.core.security_properties.security_flags |= crate::security::SecurityFlags::NOPLAINTEXT;
        let registry: MechanismRegistry<dyn ServerMechanism> = MechanismRegistry::new();
        registry.register(Arc::new(PlainServerMechanism::new_in_memory(vec![])));
        let result = server_start(&conn, &registry, "PLAIN", b"");
        assert!(matches!(result, Err(e) if e.status == Status::TooWeak));
    }

    #[test]
    fn client_selects_first_locally_preferred_mechanism() {
        let conn = client_conn();
        let registry: MechanismRegistry<dyn ClientMechanism> = MechanismRegistry::new();
        registry.register(Arc::new(PlainClientMechanism::new("alice", "hunter2")));
        let start = client_start(&conn, &registry, "PLAIN", &[]).unwrap();
        assert_eq!(start.mech_name, "PLAIN");
    }

    #[test]
    fn client_external_completes_without_authid() {
        use crate::builtin::external::ExternalClientMechanism;

        let conn = client_conn();
        let registry: MechanismRegistry<dyn ClientMechanism> = MechanismRegistry::new();
        registry.register(Arc::new(ExternalClientMechanism::with_authzid("alice")));
        let start = client_start(&conn, &registry, "EXTERNAL", &[]).unwrap();
        assert_eq!(start.mech_name, "EXTERNAL");
        assert!(matches!(start.outcome, SessionOutcome::Ok(_)));
        assert!(conn.core.is_done());
        assert_eq!(
            conn.core.out_params.lock().unwrap().user.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn step_after_complete_fails_not_done() {
        let conn = server_conn();
        let registry: MechanismRegistry<dyn ServerMechanism> = MechanismRegistry::new();
        registry.register(Arc::new(PlainServerMechanism::new_in_memory(vec![(
            "alice".to_string(),
            "hunter2".to_string(),
        )])));
        server_start(&conn, &registry, "PLAIN", b"\0alice\0hunter2").unwrap();
        let result = server_step(&conn, b"");
        assert!(result.is_err());
    }
}
