//! Direct3D backend (Windows only).
//!
//! - [`device::D3D11DeviceProvider`] creates throwaway D3D11 devices for the
//!   capability probe and reads adapter/driver identification from DXGI.
//! - [`interop::D3D11On12Factory`] builds D3D11-on-12 interop devices so
//!   D3D12 frames can be fed to a D3D11-bound encoder.

pub mod device;
pub mod error;
pub mod interop;

pub use self::device::{D3D11DeviceProvider, D3D11ProbeDevice};
pub use self::error::D3dError;
pub use self::interop::{D3D11On12Factory, D3D11On12Interop};
