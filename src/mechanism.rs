//! Mechanism polymorphism (§9): a trait-based restatement of the
//! struct-of-function-pointers descriptor from §3, held in registries keyed
//! by case-insensitive name (`registry.rs`).

use crate::callback::CallbackId;
use crate::conn::{ClientConn, ServerConn};
use crate::error::SaslError;
use crate::security::{MechFeatures, SecurityFlags};

/// Case-insensitive mechanism name, compared and hashed on its uppercased
/// form (mechanism names are conventionally upper-case, e.g. `"PLAIN"`).
#[derive(Debug, Clone)]
pub struct MechName(String);

impl MechName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn normalized(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl PartialEq for MechName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}
impl Eq for MechName {}

impl std::hash::Hash for MechName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl std::fmt::Display for MechName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A prompt the framework cannot itself satisfy, returned to a client
/// application so it can refill interactively (§4.3, §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub id: CallbackId,
    pub challenge: String,
    pub prompt_text: String,
    pub default: Option<String>,
}

/// An application's answer to one outstanding `Prompt`.
#[derive(Debug, Clone)]
pub struct PromptAnswer {
    pub id: CallbackId,
    pub result: Vec<u8>,
}

/// Out-params a mechanism step can populate on success (§3 `out_params`).
#[derive(Debug, Clone, Default)]
pub struct MechOutParams {
    pub authid: Option<String>,
    pub authzid: Option<String>,
    pub user: Option<String>,
    pub mech_ssf: u32,
    pub maxoutbuf: Option<usize>,
}

/// Tagged outcome of one `mech_step` call (§9 "Prompt list reuse").
pub enum StepOutcome {
    /// More protocol round-trips are needed; carries the token to send.
    Continue(Vec<u8>),
    /// Authentication from this mechanism's point of view is complete;
    /// carries the final token (possibly empty) and the out-params.
    Ok(Vec<u8>, MechOutParams),
    /// Client-side only: the framework could not resolve every callback the
    /// mechanism needs and must ask the application to fill the listed
    /// prompts, then retry with the *same* prompt list (§4.3).
    Interact(Vec<Prompt>),
    /// A terminal error.
    Error(SaslError),
}

/// Server-side mechanism instance: the live state of one authentication
/// exchange, created by `ServerMechanism::new_instance`.
pub trait ServerMechanismInstance: Send {
    fn step(&mut self, conn: &ServerConn, client_token: &[u8]) -> StepOutcome;
}

/// Client-side mechanism instance, mirroring the server side.
pub trait ClientMechanismInstance: Send {
    fn step(
        &mut self,
        conn: &ClientConn,
        server_token: &[u8],
        prompt_answers: &[PromptAnswer],
    ) -> StepOutcome;
}

/// The subset of a mechanism descriptor that mechanism selection and policy
/// filtering (§4.2, §4.3) care about, shared between the server and client
/// descriptor traits so `registry.rs` can store and filter either kind
/// generically.
pub trait MechanismPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn max_ssf(&self) -> u32;
    fn min_ssf(&self) -> u32 {
        0
    }
    fn security_flags(&self) -> SecurityFlags;
    fn features(&self) -> MechFeatures {
        MechFeatures::empty()
    }
}

/// Server mechanism descriptor (§3 "Mechanism descriptor").
pub trait ServerMechanism: MechanismPolicy {
    fn new_instance(&self) -> Box<dyn ServerMechanismInstance>;

    /// Optional availability gate consulted by `listmech` (§4.2): `mech_avail`.
    /// Takes the connection so a mechanism like EXTERNAL can reflect
    /// conn-local state (whether the transport has actually asserted an
    /// identity) rather than just the static descriptor.
    fn is_available(&self, _conn: &ServerConn, _user: Option<&str>) -> bool {
        true
    }

    /// Optional password-change hook used by the `setpass` transition
    /// (§11.3). Returns `Ok(())` if this mechanism accepted the new secret.
    fn set_pass(&self, _user: &str, _new_pass: &[u8]) -> Result<(), SaslError> {
        Err(SaslError::new(crate::error::Status::WrongMech))
    }
}

/// Client mechanism descriptor, mirroring the server side.
pub trait ClientMechanism: MechanismPolicy {
    fn new_instance(&self) -> Box<dyn ClientMechanismInstance>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mech_name_equality_is_case_insensitive() {
        assert_eq!(MechName::new("plain"), MechName::new("PLAIN"));
        assert_ne!(MechName::new("plain"), MechName::new("login"));
    }
}
