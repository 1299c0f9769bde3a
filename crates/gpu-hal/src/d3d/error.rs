//! Direct3D-specific error types wrapping `windows` HRESULT errors.

use thiserror::Error;

/// Direct3D backend error type.
#[derive(Error, Debug)]
pub enum D3dError {
    /// A Direct3D / DXGI call returned a failing HRESULT.
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    /// A caller handed over a null or wrong-typed interface pointer.
    #[error("Invalid {interface} handle")]
    NullHandle { interface: &'static str },

    /// The interop device was already shut down.
    #[error("D3D11On12 device has been shut down")]
    ShutDown,

    /// No hardware adapter was enumerated.
    #[error("No DXGI adapter found")]
    NoAdapter,
}

impl D3dError {
    /// `map_err` adapter tagging an HRESULT failure with the call name.
    pub fn call(call: &'static str) -> impl FnOnce(windows::core::Error) -> D3dError {
        move |source| D3dError::Call { call, source }
    }
}

impl From<D3dError> for hwenc_common::GpuError {
    fn from(err: D3dError) -> Self {
        match err {
            D3dError::Call { call, source } => hwenc_common::GpuError::Interop {
                operation: call.to_string(),
                reason: source.to_string(),
            },
            D3dError::NullHandle { interface } => hwenc_common::GpuError::InvalidDevice {
                api: interface.to_string(),
            },
            D3dError::ShutDown => {
                hwenc_common::GpuError::DeviceInit("D3D11On12 device has been shut down".into())
            }
            D3dError::NoAdapter => hwenc_common::GpuError::NoBackend("no DXGI adapter".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_maps_to_invalid_device() {
        let err: hwenc_common::GpuError = D3dError::NullHandle {
            interface: "ID3D12Device",
        }
        .into();
        assert_eq!(err.to_string(), "Invalid device handle for ID3D12Device");
    }
}
