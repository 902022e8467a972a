//! The plugin ABI (§3 "Mechanism descriptor", §6 "Plugin ABI version"): the
//! `#[repr(C)]` shape a dynamically-loaded mechanism library exposes, and
//! the entry-point symbol names the loader resolves.

use std::os::raw::{c_int, c_uint};

/// The framework's compiled-in plugin ABI version. An entry point whose
/// `out_version` does not equal a version the framework recognizes is
/// rejected with `BADVERS` (§4.1, §6).
pub const ABI_VERSION: c_int = 4;

/// Versions this build accepts from a plugin's `out_version` (§4.1 "Mixed
/// versions within one library are permitted").
pub const SUPPORTED_VERSIONS: &[c_int] = &[3, 4];

pub fn is_supported_version(version: c_int) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Symbol name a server mechanism plugin library must export.
pub const SERVER_ENTRYNAME: &str = "sasl_server_plug_init";
/// Symbol name a client mechanism plugin library must export.
pub const CLIENT_ENTRYNAME: &str = "sasl_client_plug_init";
/// Symbol name an auxprop plugin library must export.
pub const AUXPROP_ENTRYNAME: &str = "sasl_auxprop_plug_init";

/// `#[repr(C)]` wire shape of one server mechanism descriptor, as a loaded
/// library hands it back from its entry point (§3). `glob_context` and the
/// function pointers are raw because they cross an FFI boundary; the
/// adapter in `plugin/mod.rs` wraps each into a safe `ServerMechanism`.
#[repr(C)]
pub struct RawServerPlug {
    pub mech_name: *const std::os::raw::c_char,
    pub max_ssf: c_uint,
    pub security_flags: c_uint,
    pub features: c_uint,
    pub glob_context: *mut std::os::raw::c_void,
    pub mech_new: Option<
        unsafe extern "C" fn(
            glob_context: *mut std::os::raw::c_void,
            conn_context: *mut *mut std::os::raw::c_void,
        ) -> c_int,
    >,
    pub mech_step: Option<
        unsafe extern "C" fn(
            conn_context: *mut std::os::raw::c_void,
            client_in: *const u8,
            client_in_len: c_uint,
            server_out: *mut *const u8,
            server_out_len: *mut c_uint,
        ) -> c_int,
    >,
    pub mech_dispose:
        Option<unsafe extern "C" fn(conn_context: *mut std::os::raw::c_void)>,
    pub mech_free: Option<unsafe extern "C" fn(glob_context: *mut std::os::raw::c_void)>,
}

/// Entry point signature a server mechanism library exports under
/// [`SERVER_ENTRYNAME`] (§4.1, §6 `plug_init`).
pub type ServerPlugInit = unsafe extern "C" fn(
    max_version: c_int,
    out_version: *mut c_int,
    plug_list: *mut *const RawServerPlug,
    plug_count: *mut c_int,
) -> c_int;

/// `#[repr(C)]` wire shape of one client mechanism descriptor, mirroring
/// [`RawServerPlug`].
#[repr(C)]
pub struct RawClientPlug {
    pub mech_name: *const std::os::raw::c_char,
    pub max_ssf: c_uint,
    pub security_flags: c_uint,
    pub features: c_uint,
    pub glob_context: *mut std::os::raw::c_void,
    pub mech_new: Option<
        unsafe extern "C" fn(
            glob_context: *mut std::os::raw::c_void,
            conn_context: *mut *mut std::os::raw::c_void,
        ) -> c_int,
    >,
    pub mech_step: Option<
        unsafe extern "C" fn(
            conn_context: *mut std::os::raw::c_void,
            server_in: *const u8,
            server_in_len: c_uint,
            client_out: *mut *const u8,
            client_out_len: *mut c_uint,
        ) -> c_int,
    >,
    pub mech_dispose:
        Option<unsafe extern "C" fn(conn_context: *mut std::os::raw::c_void)>,
    pub mech_free: Option<unsafe extern "C" fn(glob_context: *mut std::os::raw::c_void)>,
}

pub type ClientPlugInit = unsafe extern "C" fn(
    max_version: c_int,
    out_version: *mut c_int,
    plug_list: *mut *const RawClientPlug,
    plug_count: *mut c_int,
) -> c_int;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_abi_version_is_supported() {
        assert!(is_supported_version(ABI_VERSION));
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(!is_supported_version(999));
    }
}
