//! LOGIN (§11.5, §12): a two-prompt, server-first exchange — `Username:`
//! then `Password:` — grounded in the original plugin's three-state
//! machine (states 1/2/3 there map to `WaitingForUsername` /
//! `WaitingForPassword` / done here). Never negotiates a security layer.

use std::sync::Arc;

use crate::callback::{CallbackId, CallbackList, CallbackResolver, CallbackResult, CallbackValue};
use crate::conn::{ClientConn, ServerConn};
use crate::error::{SaslError, Status};
use crate::mechanism::{
    ClientMechanism, ClientMechanismInstance, MechOutParams, MechanismPolicy, Prompt,
    PromptAnswer, ServerMechanism, ServerMechanismInstance, StepOutcome,
};
use crate::security::{MechFeatures, SecurityFlags};

use super::plain::{InMemoryVerifier, PlainVerifier};

const USERNAME_CHALLENGE: &[u8] = b"Username:";
const PASSWORD_CHALLENGE: &[u8] = b"Password:";
const MAX_FIELD_LEN: usize = 1024;

pub struct LoginServerMechanism {
    verifier: Arc<dyn PlainVerifier>,
}

impl LoginServerMechanism {
    pub fn new(verifier: Arc<dyn PlainVerifier>) -> Self {
        Self { verifier }
    }

    pub fn new_in_memory(entries: Vec<(String, String)>) -> Self {
        Self::new(Arc::new(InMemoryVerifier::new(entries)))
    }
}

impl MechanismPolicy for LoginServerMechanism {
    fn name(&self) -> &str {
        "LOGIN"
    }
    fn max_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags {
        SecurityFlags::NOANONYMOUS
    }
    fn features(&self) -> MechFeatures {
        MechFeatures::empty()
    }
}

enum ServerState {
    Initial,
    WaitingForUsername,
    WaitingForPassword { username: String },
    Done,
}

struct LoginServerInstance {
    state: ServerState,
    verifier: Arc<dyn PlainVerifier>,
}

fn field_as_string(bytes: &[u8]) -> Result<String, SaslError> {
    if bytes.len() > MAX_FIELD_LEN {
        return Err(SaslError::with_detail(Status::BadProt, "LOGIN field too long"));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| SaslError::with_detail(Status::BadProt, "LOGIN field is not valid UTF-8"))
}

impl ServerMechanismInstance for LoginServerInstance {
    fn step(&mut self, _conn: &ServerConn, client_token: &[u8]) -> StepOutcome {
        match &self.state {
            ServerState::Initial => {
                if client_token.is_empty() {
                    self.state = ServerState::WaitingForUsername;
                    return StepOutcome::Continue(USERNAME_CHALLENGE.to_vec());
                }
                // Username arrived with the initial response; fall through
                // to state 2 without asking for it again.
                let username = match field_as_string(client_token) {
                    Ok(u) => u,
                    Err(err) => return StepOutcome::Error(err),
                };
                self.state = ServerState::WaitingForPassword { username };
                StepOutcome::Continue(PASSWORD_CHALLENGE.to_vec())
            }
            ServerState::WaitingForUsername => {
                let username = match field_as_string(client_token) {
                    Ok(u) => u,
                    Err(err) => return StepOutcome::Error(err),
                };
                self.state = ServerState::WaitingForPassword { username };
                StepOutcome::Continue(PASSWORD_CHALLENGE.to_vec())
            }
            ServerState::WaitingForPassword { username } => {
                let username = username.clone();
                if client_token.len() > MAX_FIELD_LEN {
                    return StepOutcome::Error(SaslError::with_detail(Status::BadProt, "LOGIN password too long"));
                }
                match self.verifier.verify(&username, client_token) {
                    Ok(true) => {
                        self.state = ServerState::Done;
                        StepOutcome::Ok(
                            Vec::new(),
                            MechOutParams {
                                authid: Some(username),
                                authzid: None,
                                user: None,
                                mech_ssf: 0,
                                maxoutbuf: None,
                            },
                        )
                    }
                    Ok(false) => StepOutcome::Error(SaslError::new(Status::BadAuth)),
                    Err(err) => StepOutcome::Error(err),
                }
            }
            ServerState::Done => StepOutcome::Error(SaslError::with_detail(
                Status::BadProt,
                "LOGIN stepped again after completion",
            )),
        }
    }
}

impl ServerMechanism for LoginServerMechanism {
    fn new_instance(&self) -> Box<dyn ServerMechanismInstance> {
        Box::new(LoginServerInstance {
            state: ServerState::Initial,
            verifier: self.verifier.clone(),
        })
    }
}

/// Client side. Credentials may be supplied up front (`new`) or resolved
/// later via `INTERACT` prompts (`new_interactive`), mirroring
/// `get_userid`/`get_password`/`make_prompts` in the original.
pub struct LoginClientMechanism {
    authid: Option<String>,
    password: Option<Vec<u8>>,
}

impl LoginClientMechanism {
    pub fn new(authid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            authid: Some(authid.into()),
            password: Some(password.into().into_bytes()),
        }
    }

    pub fn new_interactive() -> Self {
        Self {
            authid: None,
            password: None,
        }
    }
}

impl MechanismPolicy for LoginClientMechanism {
    fn name(&self) -> &str {
        "LOGIN"
    }
    fn max_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags {
        SecurityFlags::NOANONYMOUS
    }
    fn features(&self) -> MechFeatures {
        MechFeatures::empty()
    }
}

enum ClientState {
    AwaitUsernameChallenge,
    AwaitPasswordChallenge,
    Done,
}

struct LoginClientInstance {
    state: ClientState,
    authid: Option<String>,
    password: Option<Vec<u8>>,
}

impl LoginClientInstance {
    /// Fills `authid`/`password` from, in order: an answer to a prompt this
    /// mechanism already asked for, then the callback resolver's conn-local
    /// → app-global → built-in lookup (§4.4). Only a name still missing
    /// after both is turned into an `INTERACT` prompt (§4.3, scenario 5):
    /// `INTERACT` is the fallback used when no matching callback exists, not
    /// the first resort.
    fn resolve(&mut self, conn: &ClientConn, prompt_answers: &[PromptAnswer]) {
        if self.authid.is_none() {
            if let Some(answer) = prompt_answers.iter().find(|a| a.id == CallbackId::User) {
                self.authid = Some(String::from_utf8_lossy(&answer.result).into_owned());
            } else if let Some(value) = resolve_callback(conn, CallbackId::User, "Authorization Name") {
                if let Some(text) = value.as_text() {
                    self.authid = Some(text.to_string());
                }
            }
        }
        if self.password.is_none() {
            if let Some(answer) = prompt_answers.iter().find(|a| a.id == CallbackId::Pass) {
                self.password = Some(answer.result.clone());
            } else if let Some(value) = resolve_callback(conn, CallbackId::Pass, "Password") {
                match value {
                    CallbackValue::Secret(bytes) => self.password = Some(bytes),
                    CallbackValue::Text(s) => self.password = Some(s.into_bytes()),
                    CallbackValue::Bool(_) => {}
                }
            }
        }
    }
}

/// Looks up `id` against the conn-local callback list (§4.4); there is no
/// app-global tier reachable from a client mechanism instance, so it is
/// passed as an empty list and conn-local is effectively authoritative here.
fn resolve_callback(conn: &ClientConn, id: CallbackId, prompt: &str) -> Option<CallbackValue> {
    let app_global = CallbackList::default();
    let resolver = CallbackResolver::new(&conn.core.callbacks, &app_global);
    let entry = resolver.resolve(id)?;
    match entry.proc.call(id, prompt, None) {
        CallbackResult::Value(value) => Some(value),
        CallbackResult::NeedsInteraction | CallbackResult::Error(_) => None,
    }
}

impl LoginClientInstance {
    fn missing_prompts(&self) -> Vec<Prompt> {
        let mut prompts = Vec::new();
        if self.authid.is_none() {
            prompts.push(Prompt {
                id: CallbackId::User,
                challenge: "Authorization Name".to_string(),
                prompt_text: "Please enter your authorization name".to_string(),
                default: None,
            });
        }
        if self.password.is_none() {
            prompts.push(Prompt {
                id: CallbackId::Pass,
                challenge: "Password".to_string(),
                prompt_text: "Please enter your password".to_string(),
                default: None,
            });
        }
        prompts
    }
}

impl ClientMechanismInstance for LoginClientInstance {
    fn step(
        &mut self,
        conn: &ClientConn,
        server_token: &[u8],
        prompt_answers: &[PromptAnswer],
    ) -> StepOutcome {
        match self.state {
            ClientState::AwaitUsernameChallenge => {
                if conn.core.security_properties.min_ssf > 0 {
                    return StepOutcome::Error(SaslError::new(Status::TooWeak));
                }
                self.resolve(conn, prompt_answers);
                let missing = self.missing_prompts();
                if !missing.is_empty() {
                    return StepOutcome::Interact(missing);
                }
                if server_token != USERNAME_CHALLENGE {
                    return StepOutcome::Error(SaslError::with_detail(
                        Status::BadProt,
                        "expected LOGIN Username: challenge",
                    ));
                }
                self.state = ClientState::AwaitPasswordChallenge;
                StepOutcome::Continue(self.authid.clone().unwrap_or_default().into_bytes())
            }
            ClientState::AwaitPasswordChallenge => {
                if server_token != PASSWORD_CHALLENGE {
                    return StepOutcome::Error(SaslError::with_detail(
                        Status::BadProt,
                        "expected LOGIN Password: challenge",
                    ));
                }
                self.state = ClientState::Done;
                StepOutcome::Ok(
                    self.password.clone().unwrap_or_default(),
                    MechOutParams {
                        authid: self.authid.clone(),
                        authzid: None,
                        user: None,
                        mech_ssf: 0,
                        maxoutbuf: None,
                    },
                )
            }
            ClientState::Done => StepOutcome::Error(SaslError::with_detail(
                Status::BadProt,
                "LOGIN stepped again after completion",
            )),
        }
    }
}

impl ClientMechanism for LoginClientMechanism {
    fn new_instance(&self) -> Box<dyn ClientMechanismInstance> {
        Box::new(LoginClientInstance {
            state: ClientState::AwaitUsernameChallenge,
            authid: self.authid.clone(),
            password: self.password.clone(),
        })
    }
}
