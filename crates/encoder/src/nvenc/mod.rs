//! NVENC hardware video encoder module.
//!
//! The nvEncodeAPI runtime is loaded dynamically, so the application degrades
//! gracefully when no NVIDIA hardware or driver is present.
//!
//! # Module Structure
//!
//! - [`ffi`] -- Raw FFI bindings for nvEncodeAPI.
//! - [`loader`] -- Locating the runtime and resolving its export table.
//! - [`params`] -- Mapping layer configs onto NVENC structs.
//! - [`session`] -- The encoder session state machine.
//! - [`bitstream`] -- Output bitstream buffer and packet extraction.

pub mod bitstream;
pub mod ffi;
pub mod loader;
pub mod params;
pub mod session;

pub use bitstream::{BitstreamBuffer, BitstreamLock};
pub use ffi::NvencFunctionList;
pub use loader::{candidate_paths, ModuleProvider, NvencLibrary, RuntimeLoader, SymbolSource, SystemModules};
pub use params::{EncodeParameters, ParameterMapper};
pub use session::{EncodeStatus, EncoderSession, SessionBinding, SessionState};
