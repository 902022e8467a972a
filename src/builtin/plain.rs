//! PLAIN (§12): a single client-first message `authzid NUL authid NUL
//! passwd`, verified either against an in-memory credential table or an
//! application-supplied `checkpass`-style callback. Never negotiates a
//! security layer — `mech_ssf` is always 0.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::conn::{ClientConn, ServerConn};
use crate::error::{SaslError, Status};
use crate::mechanism::{
    ClientMechanism, ClientMechanismInstance, MechOutParams, MechanismPolicy, PromptAnswer,
    ServerMechanism, ServerMechanismInstance, StepOutcome,
};
use crate::security::{MechFeatures, SecurityFlags};

/// Checks a `(authzid, authid, password)` triple, the same role a
/// `checkpass`-style application callback plays in the original (§4.4,
/// §6 `checkpass`).
pub trait PlainVerifier: Send + Sync {
    fn verify(&self, authid: &str, password: &[u8]) -> Result<bool, SaslError>;
}

/// Reference verifier backed by a plaintext in-memory table (§11.4-style
/// reference store, scoped to this one mechanism rather than the general
/// auxprop backend).
pub struct InMemoryVerifier {
    table: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryVerifier {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        let table = entries
            .into_iter()
            .map(|(user, pass)| (user, pass.into_bytes()))
            .collect();
        Self {
            table: Mutex::new(table),
        }
    }
}

impl PlainVerifier for InMemoryVerifier {
    fn verify(&self, authid: &str, password: &[u8]) -> Result<bool, SaslError> {
        let table = self.table.lock().unwrap();
        Ok(table.get(authid).map(|p| p.as_slice()) == Some(password))
    }
}

/// Splits a PLAIN initial response into `(authzid, authid, password)`
/// (RFC 4616 layout: `[authzid] NUL authid NUL passwd`).
fn split_plain_message(msg: &[u8]) -> Result<(String, String, Vec<u8>), SaslError> {
    let mut parts = msg.splitn(3, |&b| b == 0);
    let authzid = parts
        .next()
        .ok_or_else(|| SaslError::with_detail(Status::BadProt, "missing PLAIN authzid field"))?;
    let authid = parts
        .next()
        .ok_or_else(|| SaslError::with_detail(Status::BadProt, "missing PLAIN authid field"))?;
    let password = parts
        .next()
        .ok_or_else(|| SaslError::with_detail(Status::BadProt, "missing PLAIN password field"))?;
    if parts.next().is_some() {
        return Err(SaslError::with_detail(Status::BadProt, "extra NUL in PLAIN message"));
    }
    let authzid = String::from_utf8(authzid.to_vec())
        .map_err(|_| SaslError::with_detail(Status::BadProt, "authzid is not valid UTF-8"))?;
    let authid = String::from_utf8(authid.to_vec())
        .map_err(|_| SaslError::with_detail(Status::BadProt, "authid is not valid UTF-8"))?;
    if authid.is_empty() {
        return Err(SaslError::with_detail(Status::BadProt, "empty PLAIN authid"));
    }
    Ok((authzid, authid, password.to_vec()))
}

pub struct PlainServerMechanism {
    verifier: Arc<dyn PlainVerifier>,
}

impl PlainServerMechanism {
    pub fn new(verifier: Arc<dyn PlainVerifier>) -> Self {
        Self { verifier }
    }

    pub fn new_in_memory(entries: Vec<(String, String)>) -> Self {
        Self::new(Arc::new(InMemoryVerifier::new(entries)))
    }
}

impl MechanismPolicy for PlainServerMechanism {
    fn name(&self) -> &str {
        "PLAIN"
    }
    fn max_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags {
        // PLAIN sends the password in the clear: it cannot claim NOPLAINTEXT.
        SecurityFlags::empty()
    }
    fn features(&self) -> MechFeatures {
        MechFeatures::empty()
    }
}

struct PlainServerInstance {
    verifier: Arc<dyn PlainVerifier>,
}

impl ServerMechanismInstance for PlainServerInstance {
    fn step(&mut self, _conn: &ServerConn, client_token: &[u8]) -> StepOutcome {
        let (authzid, authid, password) = match split_plain_message(client_token) {
            Ok(parsed) => parsed,
            Err(err) => return StepOutcome::Error(err),
        };
        match self.verifier.verify(&authid, &password) {
            Ok(true) => StepOutcome::Ok(
                Vec::new(),
                MechOutParams {
                    authid: Some(authid),
                    authzid: if authzid.is_empty() { None } else { Some(authzid) },
                    user: None,
                    mech_ssf: 0,
                    maxoutbuf: None,
                },
            ),
            Ok(false) => StepOutcome::Error(SaslError::new(Status::BadAuth)),
            Err(err) => StepOutcome::Error(err),
        }
    }
}

impl ServerMechanism for PlainServerMechanism {
    fn new_instance(&self) -> Box<dyn ServerMechanismInstance> {
        Box::new(PlainServerInstance {
            verifier: self.verifier.clone(),
        })
    }
}

/// Client side: holds the credentials to send and an optional authzid.
pub struct PlainClientMechanism {
    authzid: Option<String>,
    authid: String,
    password: Vec<u8>,
}

impl PlainClientMechanism {
    pub fn new(authid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            authzid: None,
            authid: authid.into(),
            password: password.into().into_bytes(),
        }
    }

    pub fn with_authzid(mut self, authzid: impl Into<String>) -> Self {
        self.authzid = Some(authzid.into());
        self
    }
}

impl MechanismPolicy for PlainClientMechanism {
    fn name(&self) -> &str {
        "PLAIN"
    }
    fn max_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags {
        SecurityFlags::empty()
    }
    fn features(&self) -> MechFeatures {
        MechFeatures::WANTS_CLIENT_FIRST
    }
}

struct PlainClientInstance {
    authzid: Option<String>,
    authid: String,
    password: Vec<u8>,
    sent: bool,
}

impl ClientMechanismInstance for PlainClientInstance {
    fn step(
        &mut self,
        _conn: &ClientConn,
        _server_token: &[u8],
        _prompt_answers: &[PromptAnswer],
    ) -> StepOutcome {
        if self.sent {
            return StepOutcome::Error(SaslError::with_detail(
                Status::BadProt,
                "PLAIN client mechanism stepped after sending its only message",
            ));
        }
        self.sent = true;
        let mut msg = Vec::new();
        msg.extend(self.authzid.as_deref().unwrap_or("").as_bytes());
        msg.push(0);
        msg.extend(self.authid.as_bytes());
        msg.push(0);
        msg.extend(&self.password);
        StepOutcome::Ok(
            msg,
            MechOutParams {
                authid: Some(self.authid.clone()),
                authzid: self.authzid.clone(),
                user: None,
                mech_ssf: 0,
                maxoutbuf: None,
            },
        )
    }
}

impl ClientMechanism for PlainClientMechanism {
    fn new_instance(&self) -> Box<dyn ClientMechanismInstance> {
        Box::new(PlainClientInstance {
            authzid: self.authzid.clone(),
            authid: self.authid.clone(),
            password: self.password.clone(),
            sent: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackList;
    use crate::canon::CanonService;

    fn dummy_server_conn() -> ServerConn {
        ServerConn::new(
            "imap",
            "imap.example.com",
            "",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
            Arc::new(crate::auxprop::AuxPropService::new()),
        )
        .unwrap()
    }

    fn dummy_client_conn() -> ClientConn {
        ClientConn::new(
            "imap",
            "imap.example.com",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
        )
        .unwrap()
    }

    #[test]
    fn split_plain_message_parses_three_fields() {
        let (authzid, authid, password) = split_plain_message(b"zid\0alice\0secret").unwrap();
        assert_eq!(authzid, "zid");
        assert_eq!(authid, "alice");
        assert_eq!(password, b"secret");
    }

    #[test]
    fn split_plain_message_allows_empty_authzid() {
        let (authzid, authid, _password) = split_plain_message(b"\0alice\0secret").unwrap();
        assert_eq!(authzid, "");
        assert_eq!(authid, "alice");
    }

    #[test]
    fn split_plain_message_rejects_missing_fields() {
        assert!(split_plain_message(b"alice").is_err());
        assert!(split_plain_message(b"\0alice").is_err());
    }

    #[test]
    fn split_plain_message_rejects_extra_nul() {
        assert!(split_plain_message(b"\0alice\0pass\0extra").is_err());
    }

    #[test]
    fn server_accepts_correct_credentials() {
        let mech = PlainServerMechanism::new_in_memory(vec![("alice".to_string(), "hunter2".to_string())]);
        let mut instance = mech.new_instance();
        let conn = dummy_server_conn();
        match instance.step(&conn, b"\0alice\0hunter2") {
            StepOutcome::Ok(token, out) => {
                assert!(token.is_empty());
                assert_eq!(out.authid.as_deref(), Some("alice"));
                assert_eq!(out.mech_ssf, 0);
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn server_rejects_wrong_password() {
        let mech = PlainServerMechanism::new_in_memory(vec![("alice".to_string(), "hunter2".to_string())]);
        let mut instance = mech.new_instance();
        let conn = dummy_server_conn();
        match instance.step(&conn, b"\0alice\0wrong") {
            StepOutcome::Error(err) => assert_eq!(err.status, Status::BadAuth),
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn server_rejects_unknown_user() {
        let mech = PlainServerMechanism::new_in_memory(vec![]);
        let mut instance = mech.new_instance();
        let conn = dummy_server_conn();
        match instance.step(&conn, b"\0ghost\0whatever") {
            StepOutcome::Error(err) => assert_eq!(err.status, Status::BadAuth),
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn client_sends_authzid_authid_password_on_first_step() {
        let mech = PlainClientMechanism::new("alice", "hunter2").with_authzid("zid");
        let mut instance = mech.new_instance();
        let conn = dummy_client_conn();
        match instance.step(&conn, b"", &[]) {
            StepOutcome::Ok(token, out) => {
                assert_eq!(token, b"zid\0alice\0hunter2");
                assert_eq!(out.authid.as_deref(), Some("alice"));
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn client_wants_client_first() {
        let mech = PlainClientMechanism::new("alice", "hunter2");
        assert!(mech.features().contains(MechFeatures::WANTS_CLIENT_FIRST));
    }

    #[test]
    fn server_mechanism_rejected_when_noplaintext_required() {
        let mech = PlainServerMechanism::new_in_memory(vec![]);
        assert!(!crate::registry::mechanism_allowed(
            mech.max_ssf(),
            mech.min_ssf(),
            mech.security_flags(),
            &crate::security::SecurityProperties {
                security_flags: SecurityFlags::NOPLAINTEXT,
                ..Default::default()
            },
        ));
    }
}
