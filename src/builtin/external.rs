//! EXTERNAL (§12): zero round-trips, authenticates whatever identity the
//! transport layer already asserted (`conn.core.external.auth_id`, §3).
//!
//! Per the Open Question resolution in the design ledger: the transport's
//! real strength is recorded separately in `conn.core.external`, while
//! `out_params.mech_ssf` always reports 0 here, preserving the §8
//! invariant `maxoutbuf=0 <=> mech_ssf=0 <=> encode=decode=null` — EXTERNAL
//! never installs a security layer of its own.

use crate::conn::{ClientConn, ServerConn};
use crate::error::{SaslError, Status};
use crate::mechanism::{
    ClientMechanism, ClientMechanismInstance, MechOutParams, MechanismPolicy, PromptAnswer,
    ServerMechanism, ServerMechanismInstance, StepOutcome,
};
use crate::security::{MechFeatures, SecurityFlags};

pub struct ExternalServerMechanism;

impl MechanismPolicy for ExternalServerMechanism {
    fn name(&self) -> &str {
        "EXTERNAL"
    }
    fn max_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags {
        SecurityFlags::empty()
    }
    fn features(&self) -> MechFeatures {
        MechFeatures::empty()
    }
}

struct ExternalServerInstance {
    stepped: bool,
}

impl ServerMechanismInstance for ExternalServerInstance {
    fn step(&mut self, conn: &ServerConn, client_token: &[u8]) -> StepOutcome {
        if self.stepped {
            return StepOutcome::Error(SaslError::with_detail(
                Status::BadProt,
                "EXTERNAL stepped again after completion",
            ));
        }
        self.stepped = true;

        let authzid = if client_token.is_empty() {
            None
        } else {
            match std::str::from_utf8(client_token) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    return StepOutcome::Error(SaslError::with_detail(
                        Status::BadProt,
                        "EXTERNAL authzid is not valid UTF-8",
                    ))
                }
            }
        };

        let authid = match &conn.core.external.auth_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                return StepOutcome::Error(SaslError::with_detail(
                    Status::NoMech,
                    "no externally-authenticated identity is available",
                ))
            }
        };

        StepOutcome::Ok(
            Vec::new(),
            MechOutParams {
                authid: Some(authid),
                authzid,
                user: None,
                mech_ssf: 0,
                maxoutbuf: None,
            },
        )
    }
}

impl ServerMechanism for ExternalServerMechanism {
    fn new_instance(&self) -> Box<dyn ServerMechanismInstance> {
        Box::new(ExternalServerInstance { stepped: false })
    }

    /// EXTERNAL is only worth advertising once the transport has actually
    /// asserted an identity — otherwise `listmech` would offer a mechanism
    /// every `server_start` against it is guaranteed to fail (§4.2
    /// `mech_avail`; see the design ledger's "EXTERNAL availability" entry).
    fn is_available(&self, conn: &ServerConn, _user: Option<&str>) -> bool {
        matches!(&conn.core.external.auth_id, Some(id) if !id.is_empty())
    }
}

/// Client side: sends an optional authzid (possibly empty) as its only
/// message and is immediately done.
pub struct ExternalClientMechanism {
    authzid: Option<String>,
}

impl ExternalClientMechanism {
    pub fn new() -> Self {
        Self { authzid: None }
    }

    pub fn with_authzid(authzid: impl Into<String>) -> Self {
        Self {
            authzid: Some(authzid.into()),
        }
    }
}

impl Default for ExternalClientMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl MechanismPolicy for ExternalClientMechanism {
    fn name(&self) -> &str {
        "EXTERNAL"
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

struct ExternalClientInstance {
    authzid: Option<String>,
}

impl ClientMechanismInstance for ExternalClientInstance {
    fn step(
        &mut self,
        _conn: &ClientConn,
        _server_token: &[u8],
        _prompt_answers: &[PromptAnswer],
    ) -> StepOutcome {
        StepOutcome::Ok(
            self.authzid.clone().unwrap_or_default().into_bytes(),
            MechOutParams {
                authid: None,
                authzid: self.authzid.clone(),
                user: None,
                mech_ssf: 0,
                maxoutbuf: None,
            },
        )
    }
}

impl ClientMechanism for ExternalClientMechanism {
    fn new_instance(&self) -> Box<dyn ClientMechanismInstance> {
        Box::new(ExternalClientInstance {
            authzid: self.authzid.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackList;
    use crate::canon::CanonService;
    use std::sync::Arc;

    fn server_conn_with_external(auth_id: Option<&str>) -> ServerConn {
        let mut conn = ServerConn::new(
            "imap",
            "imap.example.com",
            "",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
            Arc::new(crate::auxprop::AuxPropService::new()),
        )
        .unwrap();
        conn.core.external.ssf = 128;
        conn.core.external.auth_id = auth_id.map(str::to_string);
        conn
    }

    #[test]
    fn server_authenticates_asserted_external_identity() {
        let conn = server_conn_with_external(Some("alice"));
        let mech = ExternalServerMechanism;
        let mut instance = mech.new_instance();
        match instance.step(&conn, b"") {
            StepOutcome::Ok(token, out) => {
                assert!(token.is_empty());
                assert_eq!(out.authid.as_deref(), Some("alice"));
                assert_eq!(out.mech_ssf, 0);
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn server_reports_mech_ssf_zero_even_with_strong_transport() {
        let conn = server_conn_with_external(Some("alice"));
        assert_eq!(conn.core.external.ssf, 128);
        let mech = ExternalServerMechanism;
        let mut instance = mech.new_instance();
        match instance.step(&conn, b"") {
            StepOutcome::Ok(_, out) => assert_eq!(out.mech_ssf, 0),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn unavailable_without_an_externally_authenticated_identity() {
        let conn = server_conn_with_external(None);
        assert!(!ExternalServerMechanism.is_available(&conn, None));
    }

    #[test]
    fn available_once_transport_asserts_an_identity() {
        let conn = server_conn_with_external(Some("alice"));
        assert!(ExternalServerMechanism.is_available(&conn, None));
    }

    #[test]
    fn server_fails_without_an_externally_authenticated_identity() {
        let conn = server_conn_with_external(None);
        let mech = ExternalServerMechanism;
        let mut instance = mech.new_instance();
        match instance.step(&conn, b"") {
            StepOutcome::Error(err) => assert_eq!(err.status, Status::NoMech),
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn server_uses_client_supplied_authzid() {
        let conn = server_conn_with_external(Some("alice"));
        let mech = ExternalServerMechanism;
        let mut instance = mech.new_instance();
        match instance.step(&conn, b"zid") {
            StepOutcome::Ok(_, out) => assert_eq!(out.authzid.as_deref(), Some("zid")),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn client_sends_empty_message_by_default() {
        let mech = ExternalClientMechanism::new();
        let mut instance = mech.new_instance();
        let conn = ClientConn::new(
            "imap",
            "imap.example.com",
            CallbackList::default(),
            Arc::new(CanonService::with_default(255)),
        )
        .unwrap();
        match instance.step(&conn, b"", &[]) {
            StepOutcome::Ok(token, _) => assert!(token.is_empty()),
            _ => panic!("expected Ok"),
        }
    }
}
