//! Canon-user service (C6, §4.5): normalizes raw identity strings to a
//! canonical form before they are latched into `out_params`.

use std::sync::Mutex;

use crate::error::{SaslError, Status};
use crate::security::CanonFlags;

/// A pluggable canonicalizer. Implementations must be idempotent:
/// `canonicalize(canonicalize(x)) == canonicalize(x)` (§4.5, §8).
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, input: &str, flags: CanonFlags) -> Result<String, SaslError>;
}

/// The framework's built-in default canonicalizer: trims whitespace,
/// rejects embedded NULs, and enforces a maximum length (`CANON_BUF_SIZE`,
/// §4.5, default 255 from `FrameworkConfig`).
pub struct DefaultCanonicalizer {
    pub max_len: usize,
}

impl DefaultCanonicalizer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for DefaultCanonicalizer {
    fn default() -> Self {
        Self::new(crate::config::FrameworkConfig::get().canon_buf_size)
    }
}

impl Canonicalizer for DefaultCanonicalizer {
    fn canonicalize(&self, input: &str, _flags: CanonFlags) -> Result<String, SaslError> {
        let trimmed = input.trim();
        if trimmed.contains('\0') {
            return Err(SaslError::with_detail(
                Status::BadProt,
                "identity contains an embedded NUL",
            ));
        }
        if trimmed.len() > self.max_len {
            return Err(SaslError::with_detail(
                Status::BadProt,
                format!("identity exceeds canon buffer size ({})", self.max_len),
            ));
        }
        Ok(trimmed.to_string())
    }
}

/// Runs every registered canonicalizer, in registration order, over an
/// input (§4.5 "Pluggable canonicalizers run in registration order").
///
/// The chain is held behind a mutex, not `&mut self` (§9 "Global
/// registries"): `CanonService` is shared as an `Arc` across every
/// connection from `server_init`/`client_init` onward, so an application
/// installing a custom canonicalizer after init needs a shared reference,
/// the same way `MechanismRegistry`/`AuxPropService` do.
pub struct CanonService {
    chain: Mutex<Vec<Box<dyn Canonicalizer>>>,
}

impl CanonService {
    /// A service with only the built-in default installed.
    pub fn with_default(max_len: usize) -> Self {
        Self {
            chain: Mutex::new(vec![Box::new(DefaultCanonicalizer::new(max_len))]),
        }
    }

    pub fn new(chain: Vec<Box<dyn Canonicalizer>>) -> Self {
        Self {
            chain: Mutex::new(chain),
        }
    }

    pub fn push(&self, canonicalizer: Box<dyn Canonicalizer>) {
        self.chain.lock().unwrap().push(canonicalizer);
    }

    /// Run `input` through every canonicalizer in order, short-circuiting on
    /// the first error (a canonicalizer may fail with `BadProt`, §4.5).
    pub fn canonicalize(&self, input: &str, flags: CanonFlags) -> Result<String, SaslError> {
        let mut current = input.to_string();
        for canonicalizer in self.chain.lock().unwrap().iter() {
            current = canonicalizer.canonicalize(&current, flags)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_whitespace() {
        let c = DefaultCanonicalizer::new(255);
        let result = c.canonicalize("  alice  ", CanonFlags::AUTHID).unwrap();
        assert_eq!(result, "alice");
    }

    #[test]
    fn rejects_embedded_nul() {
        let c = DefaultCanonicalizer::new(255);
        let result = c.canonicalize("ali\0ce", CanonFlags::AUTHID);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_overlong_identity() {
        let c = DefaultCanonicalizer::new(4);
        let result = c.canonicalize("alice", CanonFlags::AUTHID);
        assert!(result.is_err());
    }

    #[test]
    fn idempotent_on_already_canonical_input() {
        let c = DefaultCanonicalizer::new(255);
        let once = c.canonicalize("  alice  ", CanonFlags::AUTHID).unwrap();
        let twice = c.canonicalize(&once, CanonFlags::AUTHID).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn service_chains_canonicalizers_in_order() {
        struct Upper;
        impl Canonicalizer for Upper {
            fn canonicalize(&self, input: &str, _flags: CanonFlags) -> Result<String, SaslError> {
                Ok(input.to_uppercase())
            }
        }
        let service = CanonService::with_default(255);
        service.push(Box::new(Upper));
        let result = service.canonicalize("  alice  ", CanonFlags::AUTHID).unwrap();
        assert_eq!(result, "ALICE");
    }
}
