//! Reference mechanisms (§12): PLAIN, LOGIN, EXTERNAL. None of these
//! negotiate a security layer — `mech_ssf` stays 0 for all three.

pub mod external;
pub mod login;
pub mod plain;
