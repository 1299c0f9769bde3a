//! Explicitly owned encoder registry.
//!
//! An [`EncoderContext`] holds the runtime loader, the capability probe and
//! the collaborators they need. Pipelines and sessions are created from it,
//! so independent contexts (for example one per test) never share state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use hwenc_common::{EncodeResult, EncoderConfig, RuntimeOverrides};
use hwenc_gpu_hal::{default_device_provider, default_interop_factory, DeviceProvider, InteropFactory};

use crate::caps::{CapabilityProbe, ProbeResult};
use crate::nvenc::loader::{ModuleProvider, RuntimeLoader, SystemModules};
use crate::nvenc::session::EncoderSession;
use crate::pipeline::NvencPipeline;

pub struct EncoderContext {
    loader: Arc<RuntimeLoader>,
    probe: CapabilityProbe,
    interop: Arc<dyn InteropFactory>,
}

impl std::fmt::Debug for EncoderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderContext")
            .field("loader", &self.loader)
            .field("probe", &self.probe)
            .finish()
    }
}

impl EncoderContext {
    pub fn new(
        modules: Arc<dyn ModuleProvider>,
        devices: Arc<dyn DeviceProvider>,
        interop: Arc<dyn InteropFactory>,
    ) -> Self {
        let loader = Arc::new(RuntimeLoader::new(modules));
        let probe = CapabilityProbe::new(Arc::clone(&loader), devices);
        Self {
            loader,
            probe,
            interop,
        }
    }

    /// Context wired to the host's dynamic loader and GPU backend, with
    /// overrides taken from the environment.
    pub fn for_host() -> Self {
        let context = Self::new(
            Arc::new(SystemModules),
            default_device_provider(),
            default_interop_factory(),
        );
        let overrides = RuntimeOverrides::from_env();
        if !overrides.is_empty() {
            info!(?overrides, "Using NVENC runtime overrides from the environment");
            context.set_overrides(overrides);
        }
        context
    }

    pub fn loader(&self) -> &Arc<RuntimeLoader> {
        &self.loader
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    pub fn interop_factory(&self) -> &Arc<dyn InteropFactory> {
        &self.interop
    }

    pub fn overrides(&self) -> RuntimeOverrides {
        self.loader.overrides()
    }

    /// Replace both overrides. Invalidates the probe cache and clears a
    /// latched load failure; nothing is reloaded eagerly.
    pub fn set_overrides(&self, overrides: RuntimeOverrides) {
        self.loader.set_overrides(overrides);
        self.probe.invalidate();
    }

    pub fn set_module_override(&self, module_dir: Option<PathBuf>) {
        let mut overrides = self.loader.overrides();
        overrides.module_dir = module_dir;
        self.set_overrides(overrides);
    }

    pub fn set_library_override(&self, library_path: Option<PathBuf>) {
        let mut overrides = self.loader.overrides();
        overrides.library_path = library_path;
        self.set_overrides(overrides);
    }

    pub fn query_capabilities(&self) -> ProbeResult {
        self.probe.query_capabilities()
    }

    pub fn is_available(&self) -> bool {
        self.probe.is_available()
    }

    /// A closed session on this context's loader.
    pub fn new_session(&self) -> EncoderSession {
        EncoderSession::new(Arc::clone(&self.loader))
    }

    /// A pipeline for `config`. The session opens lazily on the first frame.
    pub fn new_pipeline(&self, config: EncoderConfig) -> EncodeResult<NvencPipeline> {
        NvencPipeline::new(Arc::clone(&self.loader), Arc::clone(&self.interop), config)
    }
}
