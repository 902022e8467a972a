//! Plugin loader (C2, §4.1): enumerates plugin files in a search path,
//! opens each, resolves entry points, and adapts their descriptors into
//! `ServerMechanism`/`ClientMechanism` trait objects.

pub mod abi;

use std::ffi::CString;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::callback::{CallbackId, CallbackList, CallbackResolver, CallbackResult, CallbackValue};
use crate::error::{SaslError, Status};
use crate::log::Log;
use crate::mechanism::{
    ClientMechanism, ClientMechanismInstance, MechOutParams, MechanismPolicy,
    Prompt, PromptAnswer, ServerMechanism, ServerMechanismInstance, StepOutcome,
};
use crate::security::{MechFeatures, SecurityFlags};

use abi::{ClientPlugInit, RawClientPlug, RawServerPlug, ServerPlugInit};

/// What a file is being checked for before the loader opens it (the
/// `purpose` argument to the VERIFYFILE callback, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPurpose {
    Plugin,
}

impl VerifyPurpose {
    fn label(self) -> &'static str {
        match self {
            VerifyPurpose::Plugin => "PLUGIN",
        }
    }
}

/// Resolves the GETPATH callback (conn-local is never available at load
/// time, only app-global) to the plugin search path, falling back to
/// `default_path` — the compiled-in default — when no callback answers
/// (§4.4 "GETPATH defaults to the compiled-in plugin dir").
fn resolve_search_path(app_callbacks: &CallbackList, default_path: &str) -> String {
    let empty = CallbackList::default();
    let resolver = CallbackResolver::new(&empty, app_callbacks);
    match resolver.resolve(CallbackId::GetPath) {
        Some(entry) => match entry.proc.call(CallbackId::GetPath, "", Some(default_path)) {
            CallbackResult::Value(CallbackValue::Text(path)) => path,
            _ => default_path.to_string(),
        },
        None => default_path.to_string(),
    }
}

/// Calls VERIFYFILE(path, purpose) per §4.1. `CallbackProc::call` has no
/// dedicated purpose argument, so it travels folded into the prompt text.
/// With no VERIFYFILE callback registered this defaults to "OK" (§4.4).
fn verify_file(app_callbacks: &CallbackList, purpose: VerifyPurpose, path: &Path) -> bool {
    let empty = CallbackList::default();
    let resolver = CallbackResolver::new(&empty, app_callbacks);
    match resolver.resolve(CallbackId::VerifyFile) {
        Some(entry) => {
            let prompt = format!("{}:{}", purpose.label(), path.display());
            match entry.proc.call(CallbackId::VerifyFile, &prompt, None) {
                CallbackResult::Value(CallbackValue::Bool(permitted)) => permitted,
                CallbackResult::Value(_) | CallbackResult::NeedsInteraction => true,
                CallbackResult::Error(_) => false,
            }
        }
        None => true,
    }
}

/// A dynamically-loaded mechanism library. Holds the `libloading::Library`
/// alive for as long as any descriptor it contributed is still registered
/// (§9 "Plugin library lifetime": refcounted rather than "first mechanism
/// owns the handle").
pub struct LoadedLibrary {
    #[allow(dead_code)]
    library: Library,
    pub path: PathBuf,
}

impl LoadedLibrary {
    fn open(path: &Path) -> Result<Self, libloading::Error> {
        // Safety: loading a plugin means trusting its initialization code,
        // same trust boundary as any `dlopen` shim (§1 "out of scope").
        let library = unsafe { Library::new(path) }?;
        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>, libloading::Error> {
        self.library.get(name.as_bytes())
    }
}

/// Enumerates `search_path` (colon-separated directories, as returned by
/// the GETPATH callback default, §4.4) for files matching the platform's
/// shared-library naming convention.
fn candidate_files(search_path: &str) -> Vec<PathBuf> {
    let ext = std::env::consts::DLL_EXTENSION;
    let mut files = Vec::new();
    for dir in search_path.split(':').filter(|d| !d.is_empty()) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                files.push(path);
            }
        }
    }
    files
}

unsafe fn c_str_to_string(ptr: *const std::os::raw::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// Adapts one [`RawServerPlug`] descriptor, borrowed from a still-open
/// [`LoadedLibrary`], into the framework's `ServerMechanism` trait.
struct ServerPluginMechanism {
    _library: Arc<LoadedLibrary>,
    name: String,
    max_ssf: u32,
    security_flags: SecurityFlags,
    features: MechFeatures,
    glob_context: *mut std::os::raw::c_void,
    mech_new: unsafe extern "C" fn(*mut std::os::raw::c_void, *mut *mut std::os::raw::c_void) -> c_int,
    mech_step: unsafe extern "C" fn(
        *mut std::os::raw::c_void,
        *const u8,
        std::os::raw::c_uint,
        *mut *const u8,
        *mut std::os::raw::c_uint,
    ) -> c_int,
    mech_dispose: unsafe extern "C" fn(*mut std::os::raw::c_void),
}

// Safety: the raw function pointers are only ever invoked serialized per
// connection (§5 "Scheduling model"); the library stays loaded for the
// mechanism's lifetime via the `Arc<LoadedLibrary>` refcount.
unsafe impl Send for ServerPluginMechanism {}
unsafe impl Sync for ServerPluginMechanism {}

impl MechanismPolicy for ServerPluginMechanism {
    fn name(&self) -> &str {
        &self.name
    }
    fn max_ssf(&self) -> u32 {
        self.max_ssf
    }
    fn security_flags(&self) -> SecurityFlags {
        self.security_flags
    }
    fn features(&self) -> MechFeatures {
        self.features
    }
}

struct ServerPluginInstance {
    mech: *const ServerPluginMechanism,
    conn_context: *mut std::os::raw::c_void,
}

unsafe impl Send for ServerPluginInstance {}

impl ServerMechanismInstance for ServerPluginInstance {
    fn step(&mut self, _conn: &crate::conn::ServerConn, client_token: &[u8]) -> StepOutcome {
        unsafe {
            let mech = &*self.mech;
            let mut out_ptr: *const u8 = std::ptr::null();
            let mut out_len: std::os::raw::c_uint = 0;
            let code = (mech.mech_step)(
                self.conn_context,
                client_token.as_ptr(),
                client_token.len() as std::os::raw::c_uint,
                &mut out_ptr,
                &mut out_len,
            );
            let token = if out_ptr.is_null() || out_len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(out_ptr, out_len as usize).to_vec()
            };
            match Status::from_raw(code) {
                Status::Continue => StepOutcome::Continue(token),
                Status::Ok => StepOutcome::Ok(token, MechOutParams::default()),
                status => StepOutcome::Error(SaslError::new(status)),
            }
        }
    }
}

impl Drop for ServerPluginInstance {
    fn drop(&mut self) {
        unsafe {
            if !self.conn_context.is_null() {
                ((*self.mech).mech_dispose)(self.conn_context);
            }
        }
    }
}

impl ServerMechanism for ServerPluginMechanism {
    fn new_instance(&self) -> Box<dyn ServerMechanismInstance> {
        unsafe {
            let mut conn_context: *mut std::os::raw::c_void = std::ptr::null_mut();
            let code = (self.mech_new)(self.glob_context, &mut conn_context);
            if Status::from_raw(code) != Status::Ok {
                conn_context = std::ptr::null_mut();
            }
            Box::new(ServerPluginInstance {
                mech: self as *const ServerPluginMechanism,
                conn_context,
            })
        }
    }
}

/// Mirrors [`ServerPluginMechanism`] for the client side.
struct ClientPluginMechanism {
    _library: Arc<LoadedLibrary>,
    name: String,
    max_ssf: u32,
    security_flags: SecurityFlags,
    features: MechFeatures,
    glob_context: *mut std::os::raw::c_void,
    mech_new: unsafe extern "C" fn(*mut std::os::raw::c_void, *mut *mut std::os::raw::c_void) -> c_int,
    mech_step: unsafe extern "C" fn(
        *mut std::os::raw::c_void,
        *const u8,
        std::os::raw::c_uint,
        *mut *const u8,
        *mut std::os::raw::c_uint,
    ) -> c_int,
    mech_dispose: unsafe extern "C" fn(*mut std::os::raw::c_void),
}

unsafe impl Send for ClientPluginMechanism {}
unsafe impl Sync for ClientPluginMechanism {}

impl MechanismPolicy for ClientPluginMechanism {
    fn name(&self) -> &str {
        &self.name
    }
    fn max_ssf(&self) -> u32 {
        self.max_ssf
    }
    fn security_flags(&self) -> SecurityFlags {
        self.security_flags
    }
    fn features(&self) -> MechFeatures {
        self.features
    }
}

struct ClientPluginInstance {
    mech: *const ClientPluginMechanism,
    conn_context: *mut std::os::raw::c_void,
}

unsafe impl Send for ClientPluginInstance {}

impl ClientMechanismInstance for ClientPluginInstance {
    fn step(
        &mut self,
        _conn: &crate::conn::ClientConn,
        server_token: &[u8],
        _prompt_answers: &[PromptAnswer],
    ) -> StepOutcome {
        unsafe {
            let mech = &*self.mech;
            let mut out_ptr: *const u8 = std::ptr::null();
            let mut out_len: std::os::raw::c_uint = 0;
            let code = (mech.mech_step)(
                self.conn_context,
                server_token.as_ptr(),
                server_token.len() as std::os::raw::c_uint,
                &mut out_ptr,
                &mut out_len,
            );
            let token = if out_ptr.is_null() || out_len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(out_ptr, out_len as usize).to_vec()
            };
            match Status::from_raw(code) {
                Status::Continue => StepOutcome::Continue(token),
                Status::Ok => StepOutcome::Ok(token, MechOutParams::default()),
                status => StepOutcome::Error(SaslError::new(status)),
            }
        }
    }
}

impl Drop for ClientPluginInstance {
    fn drop(&mut self) {
        unsafe {
            if !self.conn_context.is_null() {
                ((*self.mech).mech_dispose)(self.conn_context);
            }
        }
    }
}

impl ClientMechanism for ClientPluginMechanism {
    fn new_instance(&self) -> Box<dyn ClientMechanismInstance> {
        unsafe {
            let mut conn_context: *mut std::os::raw::c_void = std::ptr::null_mut();
            let code = (self.mech_new)(self.glob_context, &mut conn_context);
            if Status::from_raw(code) != Status::Ok {
                conn_context = std::ptr::null_mut();
            }
            Box::new(ClientPluginInstance {
                mech: self as *const ClientPluginMechanism,
                conn_context,
            })
        }
    }
}

fn flags_from_raw(raw: u32) -> SecurityFlags {
    SecurityFlags::from_bits_truncate(raw)
}

fn features_from_raw(raw: u32) -> MechFeatures {
    MechFeatures::from_bits_truncate(raw)
}

/// Loads every server-mechanism-providing library found in the GETPATH
/// search path, registering its descriptors into `registry` (§4.1
/// algorithm). `default_search_path` is used when no GETPATH callback in
/// `app_callbacks` overrides it. Each candidate is checked with
/// VERIFYFILE(path, PLUGIN) before it is opened; a veto is logged at WARN
/// and skipped, same as any other per-library failure — it never fails
/// the whole pass.
pub fn load_server_plugins(
    default_search_path: &str,
    app_callbacks: &CallbackList,
    registry: &crate::registry::MechanismRegistry<dyn ServerMechanism>,
    logger: &Log,
) {
    let search_path = resolve_search_path(app_callbacks, default_search_path);
    for path in candidate_files(&search_path) {
        if !verify_file(app_callbacks, VerifyPurpose::Plugin, &path) {
            logger.warn(format!("VERIFYFILE vetoed plugin {}", path.display()));
            continue;
        }
        match try_load_server_library(&path) {
            Ok(mechs) => {
                for mech in mechs {
                    registry.register(Arc::new(mech));
                }
            }
            Err(err) => {
                logger.warn(format!("skipping plugin {}: {}", path.display(), err));
            }
        }
    }
}

fn try_load_server_library(path: &Path) -> Result<Vec<ServerPluginMechanism>, SaslError> {
    let library = LoadedLibrary::open(path)
        .map_err(|e| SaslError::with_detail(Status::Fail, format!("dlopen failed: {}", e)))?;
    let library = Arc::new(library);

    let init: Symbol<ServerPlugInit> = unsafe { library.symbol(abi::SERVER_ENTRYNAME) }
        .map_err(|_| SaslError::new(Status::Fail))?;

    let mut out_version: c_int = 0;
    let mut plug_list: *const RawServerPlug = std::ptr::null();
    let mut plug_count: c_int = 0;
    let code = unsafe { init(abi::ABI_VERSION, &mut out_version, &mut plug_list, &mut plug_count) };
    if Status::from_raw(code) != Status::Ok {
        return Err(SaslError::new(Status::from_raw(code)));
    }
    if !abi::is_supported_version(out_version) {
        return Err(SaslError::new(Status::BadVers));
    }
    if plug_list.is_null() || plug_count <= 0 {
        return Ok(Vec::new());
    }

    let raw_descriptors = unsafe { std::slice::from_raw_parts(plug_list, plug_count as usize) };
    let mut mechs = Vec::new();
    for raw in raw_descriptors {
        let (Some(mech_new), Some(mech_step), Some(mech_dispose)) =
            (raw.mech_new, raw.mech_step, raw.mech_dispose)
        else {
            continue;
        };
        mechs.push(ServerPluginMechanism {
            _library: library.clone(),
            name: unsafe { c_str_to_string(raw.mech_name) },
            max_ssf: raw.max_ssf as u32,
            security_flags: flags_from_raw(raw.security_flags as u32),
            features: features_from_raw(raw.features as u32),
            glob_context: raw.glob_context,
            mech_new,
            mech_step,
            mech_dispose,
        });
    }
    Ok(mechs)
}

/// Mirrors [`load_server_plugins`] for client mechanism libraries.
pub fn load_client_plugins(
    default_search_path: &str,
    app_callbacks: &CallbackList,
    registry: &crate::registry::MechanismRegistry<dyn ClientMechanism>,
    logger: &Log,
) {
    let search_path = resolve_search_path(app_callbacks, default_search_path);
    for path in candidate_files(&search_path) {
        if !verify_file(app_callbacks, VerifyPurpose::Plugin, &path) {
            logger.warn(format!("VERIFYFILE vetoed plugin {}", path.display()));
            continue;
        }
        match try_load_client_library(&path) {
            Ok(mechs) => {
                for mech in mechs {
                    registry.register(Arc::new(mech));
                }
            }
            Err(err) => {
                logger.warn(format!("skipping plugin {}: {}", path.display(), err));
            }
        }
    }
}

fn try_load_client_library(path: &Path) -> Result<Vec<ClientPluginMechanism>, SaslError> {
    let library = LoadedLibrary::open(path)
        .map_err(|e| SaslError::with_detail(Status::Fail, format!("dlopen failed: {}", e)))?;
    let library = Arc::new(library);

    let init: Symbol<ClientPlugInit> = unsafe { library.symbol(abi::CLIENT_ENTRYNAME) }
        .map_err(|_| SaslError::new(Status::Fail))?;

    let mut out_version: c_int = 0;
    let mut plug_list: *const RawClientPlug = std::ptr::null();
    let mut plug_count: c_int = 0;
    let code = unsafe { init(abi::ABI_VERSION, &mut out_version, &mut plug_list, &mut plug_count) };
    if Status::from_raw(code) != Status::Ok {
        return Err(SaslError::new(Status::from_raw(code)));
    }
    if !abi::is_supported_version(out_version) {
        return Err(SaslError::new(Status::BadVers));
    }
    if plug_list.is_null() || plug_count <= 0 {
        return Ok(Vec::new());
    }

    let raw_descriptors = unsafe { std::slice::from_raw_parts(plug_list, plug_count as usize) };
    let mut mechs = Vec::new();
    for raw in raw_descriptors {
        let (Some(mech_new), Some(mech_step), Some(mech_dispose)) =
            (raw.mech_new, raw.mech_step, raw.mech_dispose)
        else {
            continue;
        };
        mechs.push(ClientPluginMechanism {
            _library: library.clone(),
            name: unsafe { c_str_to_string(raw.mech_name) },
            max_ssf: raw.max_ssf as u32,
            security_flags: flags_from_raw(raw.security_flags as u32),
            features: features_from_raw(raw.features as u32),
            glob_context: raw.glob_context,
            mech_new,
            mech_step,
            mech_dispose,
        });
    }
    Ok(mechs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{CallbackEntry, CallbackProc};
    use std::sync::Mutex;

    #[test]
    fn candidate_files_skips_missing_directories() {
        let files = candidate_files("/nonexistent/one:/nonexistent/two");
        assert!(files.is_empty());
    }

    #[test]
    fn candidate_files_filters_by_platform_extension() {
        let dir = tempfile::tempdir().unwrap();
        let so_path = dir.path().join(format!("libfoo.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&so_path, b"not a real library").unwrap();
        let txt_path = dir.path().join("notes.txt");
        std::fs::write(&txt_path, b"ignore me").unwrap();

        let files = candidate_files(dir.path().to_str().unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0], so_path);
    }

    #[test]
    fn loading_a_non_library_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join(format!("libbogus.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&bogus, b"not an ELF/dylib").unwrap();

        let registry: crate::registry::MechanismRegistry<dyn ServerMechanism> =
            crate::registry::MechanismRegistry::new();
        let logger = Log::new(crate::log::LogMode::None);
        load_server_plugins(
            dir.path().to_str().unwrap(),
            &CallbackList::default(),
            &registry,
            &logger,
        );
        assert!(registry.is_empty());
    }

    /// A VERIFYFILE callback that always answers `false`.
    struct DenyAll;
    impl CallbackProc for DenyAll {
        fn call(&self, _id: CallbackId, _prompt: &str, _default: Option<&str>) -> CallbackResult {
            CallbackResult::Value(CallbackValue::Bool(false))
        }
    }

    #[test]
    fn verifyfile_veto_skips_a_candidate_without_opening_it() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join(format!("libbogus.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&bogus, b"not an ELF/dylib").unwrap();

        let app_callbacks = CallbackList::new(vec![CallbackEntry::new(
            CallbackId::VerifyFile,
            Arc::new(DenyAll),
        )]);
        let registry: crate::registry::MechanismRegistry<dyn ServerMechanism> =
            crate::registry::MechanismRegistry::new();
        let logger = Log::new(crate::log::LogMode::None);
        load_server_plugins(dir.path().to_str().unwrap(), &app_callbacks, &registry, &logger);
        assert!(registry.is_empty());
    }

    #[test]
    fn verify_file_defaults_to_ok_with_no_callback_registered() {
        let path = Path::new("/nonexistent/libfoo.so");
        assert!(verify_file(&CallbackList::default(), VerifyPurpose::Plugin, path));
    }

    /// A GETPATH callback recording the default it was offered, and
    /// returning a path of its own choosing.
    struct RecordingGetPath {
        seen_default: Mutex<Option<String>>,
        path: String,
    }
    impl CallbackProc for RecordingGetPath {
        fn call(&self, _id: CallbackId, _prompt: &str, default: Option<&str>) -> CallbackResult {
            *self.seen_default.lock().unwrap() = default.map(str::to_string);
            CallbackResult::Value(CallbackValue::Text(self.path.clone()))
        }
    }

    #[test]
    fn getpath_callback_overrides_the_compiled_in_default() {
        let getpath = Arc::new(RecordingGetPath {
            seen_default: Mutex::new(None),
            path: "/opt/custom/sasl2".to_string(),
        });
        let app_callbacks = CallbackList::new(vec![CallbackEntry::new(
            CallbackId::GetPath,
            getpath.clone(),
        )]);
        let resolved = resolve_search_path(&app_callbacks, "/usr/lib/sasl2");
        assert_eq!(resolved, "/opt/custom/sasl2");
        assert_eq!(
            getpath.seen_default.lock().unwrap().as_deref(),
            Some("/usr/lib/sasl2")
        );
    }

    #[test]
    fn getpath_falls_back_to_default_with_no_callback_registered() {
        let resolved = resolve_search_path(&CallbackList::default(), "/usr/lib/sasl2");
        assert_eq!(resolved, "/usr/lib/sasl2");
    }

    #[test]
    fn c_str_to_string_handles_null() {
        let s = unsafe { c_str_to_string(std::ptr::null()) };
        assert_eq!(s, "");
    }

    #[test]
    fn cstring_round_trips_through_c_str_to_string() {
        let owned = CString::new("PLAIN").unwrap();
        let s = unsafe { c_str_to_string(owned.as_ptr()) };
        assert_eq!(s, "PLAIN");
    }
}
