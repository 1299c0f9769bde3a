//! Runtime discovery and loading of the NVENC library.
//!
//! The [`RuntimeLoader`] locates the vendor module, resolves the fixed
//! export table ([`NVENC_EXPORTS`]) and hands out a shared
//! [`NvencLibrary`]. Loading is all-or-nothing: a single missing export
//! fails the whole load and no partial table is ever exposed.
//!
//! Module access goes through two small seams so tests can substitute an
//! in-process driver:
//!
//! - [`ModuleProvider`] opens a candidate path.
//! - [`SymbolSource`] resolves export names inside an opened module.
//!
//! [`SystemModules`] is the `libloading`-backed production provider.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use hwenc_common::RuntimeOverrides;

use super::ffi::{NvencFunctionList, NVENC_EXPORTS, NVENC_EXPORT_COUNT};
use crate::error::NvencLoadError;

// ---------------------------------------------------------------------------
// Module seams
// ---------------------------------------------------------------------------

/// An opened module that can resolve exports by name.
pub trait SymbolSource: Send + Sync {
    /// Address of `name`, or `None` if the module does not export it.
    fn symbol(&self, name: &str) -> Option<*const c_void>;
}

/// Opens dynamic modules.
pub trait ModuleProvider: Send + Sync {
    /// Open the module at `path`. The error string is only used for logging
    /// and diagnostics.
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, String>;
}

/// [`ModuleProvider`] backed by the operating system loader.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemModules;

struct SystemModule(libloading::Library);

impl SymbolSource for SystemModule {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        let mut cname = Vec::with_capacity(name.len() + 1);
        cname.extend_from_slice(name.as_bytes());
        cname.push(0);
        // SAFETY: the symbol is read as an untyped address and only cast to a
        // function pointer once every export has been resolved. The library
        // outlives the address because it is kept inside NvencLibrary.
        let sym: libloading::Symbol<'_, *const c_void> = unsafe { self.0.get(&cname) }.ok()?;
        let addr = *sym;
        (!addr.is_null()).then_some(addr)
    }
}

impl ModuleProvider for SystemModules {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, String> {
        // SAFETY: loading the vendor runtime runs its initializers; this is
        // the documented way to reach the NVENC entry points.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| e.to_string())?;
        Ok(Box::new(SystemModule(lib)))
    }
}

// ---------------------------------------------------------------------------
// NvencLibrary
// ---------------------------------------------------------------------------

/// A loaded NVENC runtime with every required export resolved.
///
/// Sessions hold an `Arc<NvencLibrary>`, which keeps the module mapped even
/// after the loader itself has been unloaded.
pub struct NvencLibrary {
    /// Typed function table.
    pub api: NvencFunctionList,
    exports: [*const c_void; NVENC_EXPORT_COUNT],
    path: PathBuf,
    /// Declared last so the module is unmapped after the pointers are gone.
    _module: Box<dyn SymbolSource>,
}

// SAFETY: the export addresses point into a module that stays loaded for the
// lifetime of this struct, and the NVENC entry points may be called from any
// thread.
unsafe impl Send for NvencLibrary {}
unsafe impl Sync for NvencLibrary {}

impl std::fmt::Debug for NvencLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvencLibrary")
            .field("path", &self.path)
            .field("exports", &NVENC_EXPORT_COUNT)
            .finish()
    }
}

impl NvencLibrary {
    /// Resolve every export from `module`. Fails on the first missing name.
    pub fn from_module(
        module: Box<dyn SymbolSource>,
        path: PathBuf,
    ) -> Result<Self, NvencLoadError> {
        let mut exports = [std::ptr::null::<c_void>(); NVENC_EXPORT_COUNT];
        for (slot, name) in exports.iter_mut().zip(NVENC_EXPORTS) {
            *slot = module
                .symbol(name)
                .filter(|p| !p.is_null())
                .ok_or_else(|| NvencLoadError::SymbolNotFound(name.to_string()))?;
        }

        // SAFETY: every slot holds the non-null address of the export with the
        // same index in NVENC_EXPORTS.
        let api = unsafe { NvencFunctionList::from_exports(&exports) };

        Ok(Self {
            api,
            exports,
            path,
            _module: module,
        })
    }

    /// Platform file name of the NVENC runtime.
    pub fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvEncodeAPI64.dll"
        } else {
            "libnvidia-encode.so.1"
        }
    }

    /// Path the module was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of a required export, matched case-insensitively.
    pub fn get_function(&self, name: &str) -> Option<*const c_void> {
        NVENC_EXPORTS
            .iter()
            .position(|export| export.eq_ignore_ascii_case(name))
            .map(|index| self.exports[index])
    }
}

// ---------------------------------------------------------------------------
// RuntimeLoader
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoaderState {
    library: Option<Arc<NvencLibrary>>,
    attempted: bool,
    last_error: Option<NvencLoadError>,
    overrides: RuntimeOverrides,
}

/// Locates and loads the NVENC runtime once, caching success and failure.
///
/// A failed load is latched: later calls return the same error without
/// touching the filesystem until [`unload`](Self::unload),
/// [`reset`](Self::reset) or [`set_overrides`](Self::set_overrides) clears
/// the latch.
pub struct RuntimeLoader {
    modules: Arc<dyn ModuleProvider>,
    state: Mutex<LoaderState>,
}

impl std::fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RuntimeLoader")
            .field("loaded", &state.library.is_some())
            .field("attempted", &state.attempted)
            .field("overrides", &state.overrides)
            .finish()
    }
}

impl RuntimeLoader {
    pub fn new(modules: Arc<dyn ModuleProvider>) -> Self {
        Self {
            modules,
            state: Mutex::new(LoaderState::default()),
        }
    }

    /// Loader backed by the operating system's dynamic loader.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemModules))
    }

    /// Load the runtime, or return the cached result of an earlier attempt.
    pub fn load(&self) -> Result<Arc<NvencLibrary>, NvencLoadError> {
        let mut state = self.state.lock();
        if let Some(library) = &state.library {
            return Ok(Arc::clone(library));
        }
        if state.attempted {
            return Err(state.last_error.clone().unwrap_or_else(|| {
                NvencLoadError::LibraryNotFound(NvencLibrary::library_name().to_string())
            }));
        }

        state.attempted = true;
        match self.try_load(&state.overrides) {
            Ok(library) => {
                info!(path = %library.path().display(), "NVENC runtime loaded");
                let library = Arc::new(library);
                state.library = Some(Arc::clone(&library));
                state.last_error = None;
                Ok(library)
            }
            Err(e) => {
                warn!(error = %e, "NVENC runtime unavailable");
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn try_load(&self, overrides: &RuntimeOverrides) -> Result<NvencLibrary, NvencLoadError> {
        let candidates = candidate_paths(overrides, NvencLibrary::library_name());
        let mut failures = Vec::with_capacity(candidates.len());

        for path in candidates {
            match self.modules.open(&path) {
                Ok(module) => {
                    debug!(path = %path.display(), "Opened NVENC module");
                    return NvencLibrary::from_module(module, path);
                }
                Err(reason) => {
                    debug!(path = %path.display(), %reason, "NVENC module not loadable");
                    failures.push(format!("{}: {reason}", path.display()));
                }
            }
        }

        Err(NvencLoadError::LibraryNotFound(failures.join("; ")))
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().library.is_some()
    }

    /// The loaded library, without attempting a load.
    pub fn library(&self) -> Option<Arc<NvencLibrary>> {
        self.state.lock().library.clone()
    }

    /// Address of a required export, or `None` if not loaded or unknown.
    pub fn get_function(&self, name: &str) -> Option<*const c_void> {
        self.state
            .lock()
            .library
            .as_ref()
            .and_then(|lib| lib.get_function(name))
    }

    /// Drop the loader's reference to the library and clear the latch.
    pub fn unload(&self) {
        let mut state = self.state.lock();
        if state.library.take().is_some() {
            info!("NVENC runtime unloaded");
        }
        state.attempted = false;
        state.last_error = None;
    }

    /// Clear a latched failure so the next [`load`](Self::load) retries.
    /// A loaded library is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.attempted = false;
        state.last_error = None;
    }

    /// Replace the search overrides. Takes effect on the next load attempt;
    /// an already loaded library stays loaded.
    pub fn set_overrides(&self, overrides: RuntimeOverrides) {
        let mut state = self.state.lock();
        state.overrides = overrides;
        if state.library.is_none() {
            state.attempted = false;
            state.last_error = None;
        }
    }

    pub fn overrides(&self) -> RuntimeOverrides {
        self.state.lock().overrides.clone()
    }

    pub fn last_error(&self) -> Option<NvencLoadError> {
        self.state.lock().last_error.clone()
    }
}

/// Paths to try, in order.
///
/// An explicit library path is the only candidate when set. Otherwise the
/// module directory (if any) is tried before the bare name, which goes
/// through the system search path.
pub fn candidate_paths(overrides: &RuntimeOverrides, library_name: &str) -> Vec<PathBuf> {
    if let Some(path) = overrides.resolved_library_path(library_name) {
        return vec![path];
    }

    let mut paths = Vec::with_capacity(2);
    if let Some(dir) = overrides.resolved_module_dir() {
        paths.push(dir.join(library_name));
    }
    paths.push(PathBuf::from(library_name));
    paths
}
