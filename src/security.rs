//! Bitsets and security-property types shared by the registries, session
//! state machine, and `listmech`.

use bitflags::bitflags;

bitflags! {
    /// Policy flags a caller may require of a mechanism (§3/§6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityFlags: u32 {
        const NOPLAINTEXT      = 1 << 0;
        const NOACTIVE         = 1 << 1;
        const NODICTIONARY     = 1 << 2;
        const FORWARD_SECRECY  = 1 << 3;
        const NOANONYMOUS      = 1 << 4;
        const PASS_CREDENTIALS = 1 << 5;
        const MUTUAL_AUTH      = 1 << 6;
    }
}

impl Default for SecurityFlags {
    fn default() -> Self {
        SecurityFlags::empty()
    }
}

bitflags! {
    /// Connection-level flags (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnFlags: u32 {
        const SUCCESS_DATA_ALLOWED = 1 << 0;
        const NEEDS_PROXY          = 1 << 1;
    }
}

impl Default for ConnFlags {
    fn default() -> Self {
        ConnFlags::empty()
    }
}

bitflags! {
    /// Flags passed to `auxprop_lookup` (§4.6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuxPropFlags: u32 {
        const OVERRIDE = 1 << 0;
    }
}

impl Default for AuxPropFlags {
    fn default() -> Self {
        AuxPropFlags::empty()
    }
}

bitflags! {
    /// Which identity a canonicalizer call is normalizing (§4.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CanonFlags: u32 {
        const AUTHID  = 1 << 0;
        const AUTHZID = 1 << 1;
    }
}

impl Default for CanonFlags {
    fn default() -> Self {
        CanonFlags::empty()
    }
}

bitflags! {
    /// Mechanism feature flags (§3 "feature flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MechFeatures: u32 {
        const WANTS_CLIENT_FIRST = 1 << 0;
        const CAN_SEND_LAST      = 1 << 1;
    }
}

impl Default for MechFeatures {
    fn default() -> Self {
        MechFeatures::empty()
    }
}

/// The security policy a connection enforces on mechanism selection (§3).
#[derive(Debug, Clone)]
pub struct SecurityProperties {
    pub min_ssf: u32,
    pub max_ssf: u32,
    pub max_buf_size: usize,
    pub security_flags: SecurityFlags,
}

impl Default for SecurityProperties {
    fn default() -> Self {
        Self {
            min_ssf: 0,
            max_ssf: u32::MAX,
            max_buf_size: 0xFFFF_FFFF,
            security_flags: SecurityFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_flags_default_to_empty() {
        assert_eq!(SecurityFlags::default(), SecurityFlags::empty());
    }

    #[test]
    fn security_properties_default_permits_everything() {
        let props = SecurityProperties::default();
        assert_eq!(props.min_ssf, 0);
        assert_eq!(props.max_ssf, u32::MAX);
        assert!(props.security_flags.is_empty());
    }
}
