//! Shared test fixtures: an in-process fake NVENC driver, a module provider
//! that serves its exports, and fake interop/probe devices.
//!
//! Driver state is thread-local. The test harness runs each test on its own
//! thread, so tests never see each other's counters. Call [`reset_driver`]
//! at the start of every test anyway.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use hwenc_common::{
    GpuDeviceRef, GpuError, GpuFence, GraphicsApi, PixelFormat, ResourceId, TextureRef,
};
use hwenc_encoder::nvenc::ffi::*;
use hwenc_encoder::nvenc::loader::{ModuleProvider, SymbolSource};
use hwenc_encoder::EncoderContext;
use hwenc_gpu_hal::{
    AdapterInfo, DeviceProvider, InteropDevice, InteropFactory, InteropHandle, ProbeDevice,
};

// ---------------------------------------------------------------------------
// Fake driver state
// ---------------------------------------------------------------------------

pub const SEQUENCE_HEADER: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F, 0, 0, 0, 1, 0x68, 0xEE];

#[derive(Debug)]
pub struct DriverState {
    /// Every driver entry point, in call order.
    pub calls: Vec<&'static str>,
    /// Forced status per entry point.
    pub failures: HashMap<&'static str, NvencStatus>,
    /// Status returned by successful-looking picture submissions.
    pub encode_status: NvencStatus,
    /// Buffer formats the fake hardware refuses to initialise with.
    pub rejected_formats: Vec<NvEncBufferFormat>,
    pub next_handle: usize,

    pub open_encoders: usize,
    pub live_bitstreams: usize,
    pub live_registrations: usize,
    pub live_mappings: usize,
    pub locked: bool,

    pub last_device_type: Option<u32>,
    pub tuning_info: Option<u32>,
    pub init_width: u32,
    pub init_height: u32,
    pub init_buffer_format: Option<NvEncBufferFormat>,
    pub init_gop_length: u32,
    pub init_frame_rate: (u32, u32),
    pub init_enable_ptd: u32,
    pub init_average_bitrate: u32,
    pub reconfigure_flags: Option<u32>,
    pub reconfigure_width: u32,
    pub reconfigure_average_bitrate: u32,

    pub registered_resources: Vec<usize>,
    pub registered_types: Vec<u32>,
    pub last_pic_flags: u32,
    pub last_pic_input: usize,
    pub force_idr_next: bool,
    pub frames_encoded: u32,

    pub output: Vec<u8>,
    pub output_picture_type: u32,
    pub output_timestamp: u64,
    pub sequence_params: Vec<u8>,
    pub caps: HashMap<u32, i32>,
}

impl Default for DriverState {
    fn default() -> Self {
        let caps = HashMap::from([
            (NV_ENC_CAPS_WIDTH_MAX, 4096),
            (NV_ENC_CAPS_HEIGHT_MAX, 4096),
            (NV_ENC_CAPS_NUM_MAX_BFRAMES, 0),
            (NV_ENC_CAPS_SUPPORT_LOOKAHEAD, 1),
            (NV_ENC_CAPS_SUPPORT_TEMPORAL_AQ, 1),
            (NV_ENC_CAPS_SUPPORT_10BIT_ENCODE, 1),
            (NV_ENC_CAPS_SUPPORT_YUV444_ENCODE, 0),
        ]);
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            encode_status: NV_ENC_SUCCESS,
            rejected_formats: Vec::new(),
            next_handle: 0x1000,
            open_encoders: 0,
            live_bitstreams: 0,
            live_registrations: 0,
            live_mappings: 0,
            locked: false,
            last_device_type: None,
            tuning_info: None,
            init_width: 0,
            init_height: 0,
            init_buffer_format: None,
            init_gop_length: 0,
            init_frame_rate: (0, 0),
            init_enable_ptd: 0,
            init_average_bitrate: 0,
            reconfigure_flags: None,
            reconfigure_width: 0,
            reconfigure_average_bitrate: 0,
            registered_resources: Vec::new(),
            registered_types: Vec::new(),
            last_pic_flags: 0,
            last_pic_input: 0,
            force_idr_next: true,
            frames_encoded: 0,
            output: Vec::new(),
            output_picture_type: 0,
            output_timestamp: 0,
            sequence_params: SEQUENCE_HEADER.to_vec(),
            caps,
        }
    }
}

impl DriverState {
    fn handle(&mut self) -> *mut c_void {
        let handle = self.next_handle;
        self.next_handle += 0x10;
        handle as *mut c_void
    }

    /// Record the call and return the forced status, if any.
    fn enter(&mut self, name: &'static str) -> NvencStatus {
        self.calls.push(name);
        self.failures.get(name).copied().unwrap_or(NV_ENC_SUCCESS)
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| **c == name).count()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.calls.iter().position(|c| *c == name)
    }

    pub fn last_position(&self, name: &str) -> Option<usize> {
        self.calls.iter().rposition(|c| *c == name)
    }
}

thread_local! {
    static DRIVER: RefCell<DriverState> = RefCell::new(DriverState::default());
}

pub fn reset_driver() {
    DRIVER.with(|d| *d.borrow_mut() = DriverState::default());
}

pub fn driver<R>(f: impl FnOnce(&mut DriverState) -> R) -> R {
    DRIVER.with(|d| f(&mut d.borrow_mut()))
}

pub fn fail(name: &'static str, status: NvencStatus) {
    driver(|d| {
        d.failures.insert(name, status);
    });
}

pub fn clear_failure(name: &'static str) {
    driver(|d| {
        d.failures.remove(name);
    });
}

pub fn calls() -> Vec<&'static str> {
    driver(|d| d.calls.clone())
}

// ---------------------------------------------------------------------------
// Fake driver entry points
// ---------------------------------------------------------------------------

unsafe extern "C" fn fake_create_instance(list: *mut NvEncodeApiFunctionList) -> NvencStatus {
    if list.is_null() {
        return NV_ENC_ERR_INVALID_PTR;
    }
    driver(|d| d.enter("NvEncodeAPICreateInstance"))
}

unsafe extern "C" fn fake_open_session(
    params: *mut NvEncOpenEncodeSessionExParams,
    encoder: *mut *mut c_void,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncOpenEncodeSessionEx");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: the encoder passes valid pointers.
        unsafe {
            if (*params).device.is_null() {
                return NV_ENC_ERR_INVALID_PTR;
            }
            d.last_device_type = Some((*params).device_type as u32);
            *encoder = d.handle();
        }
        d.open_encoders += 1;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_initialize(
    _encoder: *mut c_void,
    params: *mut NvEncInitializeParams,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncInitializeEncoder");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: the encoder passes a valid init struct whose config pointer
        // is alive for the call.
        unsafe {
            let init = &*params;
            if d.rejected_formats.contains(&init.buffer_format) {
                return NV_ENC_ERR_UNSUPPORTED_PARAM;
            }
            d.init_width = init.encode_width;
            d.init_height = init.encode_height;
            d.init_buffer_format = Some(init.buffer_format);
            d.init_frame_rate = (init.frame_rate_num, init.frame_rate_den);
            d.init_enable_ptd = init.enable_ptd;
            if let Some(config) = init.encode_config.as_ref() {
                d.init_gop_length = config.gop_length;
                d.init_average_bitrate = config.rc_params.average_bitrate;
            }
        }
        d.force_idr_next = true;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_reconfigure(
    _encoder: *mut c_void,
    params: *mut NvEncReconfigureParams,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncReconfigureEncoder");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid pointers from the encoder.
        unsafe {
            let params = &*params;
            d.reconfigure_flags = Some(params.flags);
            d.reconfigure_width = params.re_init_encode_params.encode_width;
            if let Some(config) = params.re_init_encode_params.encode_config.as_ref() {
                d.reconfigure_average_bitrate = config.rc_params.average_bitrate;
            }
            if params.flags & RECONFIGURE_FORCE_IDR != 0 {
                d.force_idr_next = true;
            }
        }
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_encode_picture(
    _encoder: *mut c_void,
    pic: *mut NvEncPicParams,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncEncodePicture");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid picture params from the encoder.
        let pic = unsafe { &*pic };
        if pic.input_buffer.is_null() || pic.output_bitstream.is_null() {
            return NV_ENC_ERR_INVALID_PTR;
        }
        d.last_pic_flags = pic.encode_pic_flags;
        d.last_pic_input = pic.input_buffer as usize;

        if d.encode_status != NV_ENC_SUCCESS {
            return d.encode_status;
        }

        let idr = d.force_idr_next || pic.encode_pic_flags & NV_ENC_PIC_FLAG_FORCEIDR != 0;
        d.force_idr_next = false;
        let nal = if idr { 0x65 } else { 0x41 };
        d.output = vec![0, 0, 0, 1, nal, d.frames_encoded as u8];
        d.output_picture_type = if idr { 3 } else { 0 };
        d.output_timestamp = pic.input_time_stamp;
        d.frames_encoded += 1;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_destroy_encoder(_encoder: *mut c_void) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncDestroyEncoder");
        d.open_encoders = d.open_encoders.saturating_sub(1);
        status
    })
}

unsafe extern "C" fn fake_flush(_encoder: *mut c_void, _event: *mut c_void) -> NvencStatus {
    driver(|d| d.enter("NvEncFlushEncoderQueue"))
}

unsafe extern "C" fn fake_get_caps(
    _encoder: *mut c_void,
    _codec: NvGuid,
    param: *mut NvEncCapsParam,
    value: *mut i32,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncGetEncodeCaps");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid pointers from the encoder.
        unsafe {
            let cap = (*param).caps_to_query;
            *value = d.caps.get(&cap).copied().unwrap_or(0);
        }
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_get_guids(
    _encoder: *mut c_void,
    _codec: NvGuid,
    _guids: *mut NvGuid,
    _size: u32,
    count: *mut u32,
) -> NvencStatus {
    if !count.is_null() {
        // SAFETY: checked for null.
        unsafe { *count = 0 };
    }
    NV_ENC_SUCCESS
}

unsafe extern "C" fn fake_preset_config(
    _encoder: *mut c_void,
    _codec: NvGuid,
    _preset: NvGuid,
    tuning: u32,
    config: *mut NvEncPresetConfig,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncGetEncodePresetConfigEx");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        d.tuning_info = Some(tuning);
        // SAFETY: valid preset struct from the encoder.
        unsafe {
            (*config).preset_cfg.gop_length = 250;
            (*config).preset_cfg.frame_interval_p = 3;
        }
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_create_input(
    _encoder: *mut c_void,
    _params: *mut NvEncCreateInputBuffer,
) -> NvencStatus {
    NV_ENC_SUCCESS
}

unsafe extern "C" fn fake_destroy_input(_encoder: *mut c_void, _input: *mut c_void) -> NvencStatus {
    NV_ENC_SUCCESS
}

unsafe extern "C" fn fake_create_bitstream(
    _encoder: *mut c_void,
    params: *mut NvEncCreateBitstreamBuffer,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncCreateBitstreamBuffer");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid pointer from the encoder.
        unsafe { (*params).bitstream_buffer = d.handle() };
        d.live_bitstreams += 1;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_destroy_bitstream(
    _encoder: *mut c_void,
    _buffer: *mut c_void,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncDestroyBitstreamBuffer");
        d.live_bitstreams = d.live_bitstreams.saturating_sub(1);
        status
    })
}

unsafe extern "C" fn fake_register(
    _encoder: *mut c_void,
    params: *mut NvEncRegisterResource,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncRegisterResource");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid pointer from the encoder.
        unsafe {
            let params = &mut *params;
            d.registered_resources.push(params.resource_to_register as usize);
            d.registered_types.push(params.resource_type as u32);
            params.registered_resource = d.handle();
        }
        d.live_registrations += 1;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_unregister(_encoder: *mut c_void, _resource: *mut c_void) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncUnregisterResource");
        d.live_registrations = d.live_registrations.saturating_sub(1);
        status
    })
}

unsafe extern "C" fn fake_map(
    _encoder: *mut c_void,
    params: *mut NvEncMapInputResource,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncMapInputResource");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: valid pointer from the encoder.
        unsafe { (*params).mapped_resource = d.handle() };
        d.live_mappings += 1;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_unmap(_encoder: *mut c_void, _mapped: *mut c_void) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncUnmapInputResource");
        d.live_mappings = d.live_mappings.saturating_sub(1);
        status
    })
}

unsafe extern "C" fn fake_lock_input(
    _encoder: *mut c_void,
    _params: *mut NvEncLockInputBuffer,
) -> NvencStatus {
    NV_ENC_SUCCESS
}

unsafe extern "C" fn fake_unlock_input(_encoder: *mut c_void, _input: *mut c_void) -> NvencStatus {
    NV_ENC_SUCCESS
}

unsafe extern "C" fn fake_lock_bitstream(
    _encoder: *mut c_void,
    params: *mut NvEncLockBitstream,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncLockBitstream");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        if d.locked {
            return NV_ENC_ERR_LOCK_BUSY;
        }
        // SAFETY: valid pointer from the encoder. `output` is not touched
        // again until the next picture, after the unlock.
        unsafe {
            let params = &mut *params;
            params.bitstream_buffer_ptr = d.output.as_mut_ptr().cast();
            params.bitstream_size_in_bytes = d.output.len() as u32;
            params.picture_type = d.output_picture_type;
            params.output_time_stamp = d.output_timestamp;
        }
        d.locked = true;
        NV_ENC_SUCCESS
    })
}

unsafe extern "C" fn fake_unlock_bitstream(_encoder: *mut c_void, _buffer: *mut c_void) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncUnlockBitstream");
        d.locked = false;
        status
    })
}

unsafe extern "C" fn fake_sequence_params(
    _encoder: *mut c_void,
    payload: *mut NvEncSequenceParamPayload,
) -> NvencStatus {
    driver(|d| {
        let status = d.enter("NvEncGetSequenceParams");
        if status != NV_ENC_SUCCESS {
            return status;
        }
        // SAFETY: the payload points at a caller buffer of in_buffer_size bytes.
        unsafe {
            let payload = &mut *payload;
            let len = d.sequence_params.len().min(payload.in_buffer_size as usize);
            std::ptr::copy_nonoverlapping(
                d.sequence_params.as_ptr(),
                payload.spspps_buffer.cast::<u8>(),
                len,
            );
            *payload.out_spspps_payload_size = len as u32;
        }
        NV_ENC_SUCCESS
    })
}

fn fake_export(name: &str) -> Option<*const c_void> {
    let address = match name {
        "NvEncodeAPICreateInstance" => fake_create_instance as *const c_void,
        "NvEncOpenEncodeSessionEx" => fake_open_session as *const c_void,
        "NvEncInitializeEncoder" => fake_initialize as *const c_void,
        "NvEncReconfigureEncoder" => fake_reconfigure as *const c_void,
        "NvEncEncodePicture" => fake_encode_picture as *const c_void,
        "NvEncDestroyEncoder" => fake_destroy_encoder as *const c_void,
        "NvEncFlushEncoderQueue" => fake_flush as *const c_void,
        "NvEncGetEncodeCaps" => fake_get_caps as *const c_void,
        "NvEncGetEncodePresetGUIDs" => fake_get_guids as *const c_void,
        "NvEncGetEncodeProfileGUIDs" => fake_get_guids as *const c_void,
        "NvEncGetEncodePresetConfigEx" => fake_preset_config as *const c_void,
        "NvEncCreateInputBuffer" => fake_create_input as *const c_void,
        "NvEncDestroyInputBuffer" => fake_destroy_input as *const c_void,
        "NvEncCreateBitstreamBuffer" => fake_create_bitstream as *const c_void,
        "NvEncDestroyBitstreamBuffer" => fake_destroy_bitstream as *const c_void,
        "NvEncRegisterResource" => fake_register as *const c_void,
        "NvEncUnregisterResource" => fake_unregister as *const c_void,
        "NvEncMapInputResource" => fake_map as *const c_void,
        "NvEncUnmapInputResource" => fake_unmap as *const c_void,
        "NvEncLockInputBuffer" => fake_lock_input as *const c_void,
        "NvEncUnlockInputBuffer" => fake_unlock_input as *const c_void,
        "NvEncLockBitstream" => fake_lock_bitstream as *const c_void,
        "NvEncUnlockBitstream" => fake_unlock_bitstream as *const c_void,
        "NvEncGetSequenceParams" => fake_sequence_params as *const c_void,
        _ => return None,
    };
    Some(address)
}

// ---------------------------------------------------------------------------
// Fake module provider
// ---------------------------------------------------------------------------

struct FakeSymbols {
    missing: HashSet<String>,
}

impl SymbolSource for FakeSymbols {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        if self.missing.contains(name) {
            return None;
        }
        fake_export(name)
    }
}

/// Serves the fake driver's exports from any path it accepts.
#[derive(Default)]
pub struct FakeModules {
    /// When false, every open fails.
    present: AtomicBool,
    /// When set, only this exact path opens.
    only_path: Mutex<Option<PathBuf>>,
    missing: Mutex<HashSet<String>>,
    opened: Mutex<Vec<PathBuf>>,
    open_attempts: AtomicUsize,
}

impl FakeModules {
    pub fn present() -> Arc<Self> {
        let modules = Self::default();
        modules.present.store(true, Ordering::SeqCst);
        Arc::new(modules)
    }

    pub fn absent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn only_at(&self, path: impl Into<PathBuf>) {
        *self.only_path.lock() = Some(path.into());
    }

    pub fn remove_export(&self, name: &str) {
        self.missing.lock().insert(name.to_string());
    }

    pub fn restore_exports(&self) {
        self.missing.lock().clear();
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

impl ModuleProvider for FakeModules {
    fn open(&self, path: &Path) -> Result<Box<dyn SymbolSource>, String> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.present.load(Ordering::SeqCst) {
            return Err("module not found".to_string());
        }
        if let Some(only) = self.only_path.lock().as_ref() {
            if only != path {
                return Err("module not found".to_string());
            }
        }
        self.opened.lock().push(path.to_path_buf());
        Ok(Box::new(FakeSymbols {
            missing: self.missing.lock().clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Fake interop
// ---------------------------------------------------------------------------

pub const INTEROP_D3D11_DEVICE: usize = 0xD311_0000;

/// Counters shared by a fake interop factory and the devices it creates.
#[derive(Debug, Default)]
pub struct InteropLog {
    pub creates: AtomicUsize,
    pub wraps: AtomicUsize,
    pub views: AtomicUsize,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub flushes: AtomicUsize,
    pub destroys: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_wrap: AtomicBool,
    pub fail_acquire: AtomicBool,
    pub events: Mutex<Vec<String>>,
    /// Driver `live_mappings` observed by each `release`.
    pub mappings_at_release: Mutex<Vec<usize>>,
}

impl InteropLog {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn event(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

pub struct FakeInteropFactory {
    pub log: Arc<InteropLog>,
}

impl FakeInteropFactory {
    pub fn new() -> (Arc<Self>, Arc<InteropLog>) {
        let log = Arc::new(InteropLog::default());
        (
            Arc::new(Self {
                log: Arc::clone(&log),
            }),
            log,
        )
    }
}

impl InteropFactory for FakeInteropFactory {
    fn create(&self, source: &GpuDeviceRef) -> Result<Box<dyn InteropDevice>, GpuError> {
        self.log.creates.fetch_add(1, Ordering::SeqCst);
        if self.log.fail_create.load(Ordering::SeqCst) {
            return Err(GpuError::DeviceInit("D3D11On12CreateDevice failed".to_string()));
        }
        if source.api != GraphicsApi::D3D12 {
            return Err(GpuError::InvalidDevice {
                api: source.api.to_string(),
            });
        }
        self.log.event("create");
        Ok(Box::new(FakeInteropDevice {
            log: Arc::clone(&self.log),
            next: 0x7000_0000,
        }))
    }
}

struct FakeInteropDevice {
    log: Arc<InteropLog>,
    next: usize,
}

impl FakeInteropDevice {
    fn handle(&mut self) -> InteropHandle {
        self.next += 0x100;
        InteropHandle::from_raw(self.next as *mut c_void).expect("non-null fake handle")
    }
}

impl InteropDevice for FakeInteropDevice {
    fn encoder_device(&self) -> GpuDeviceRef {
        GpuDeviceRef::new(GraphicsApi::D3D11, INTEROP_D3D11_DEVICE as *mut c_void)
    }

    fn wrap_resource(&mut self, source: &TextureRef) -> Result<InteropHandle, GpuError> {
        if self.log.fail_wrap.load(Ordering::SeqCst) {
            return Err(GpuError::Interop {
                operation: "CreateWrappedResource".to_string(),
                reason: "E_INVALIDARG".to_string(),
            });
        }
        self.log.wraps.fetch_add(1, Ordering::SeqCst);
        self.log.event(format!("wrap {}", source.id));
        Ok(self.handle())
    }

    fn texture_view(&mut self, _wrapped: &InteropHandle) -> Result<InteropHandle, GpuError> {
        self.log.views.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle())
    }

    fn acquire(&mut self, _wrapped: &InteropHandle) -> Result<(), GpuError> {
        if self.log.fail_acquire.load(Ordering::SeqCst) {
            return Err(GpuError::Interop {
                operation: "AcquireWrappedResources".to_string(),
                reason: "device removed".to_string(),
            });
        }
        self.log.acquires.fetch_add(1, Ordering::SeqCst);
        self.log.event("acquire");
        Ok(())
    }

    fn release(&mut self, _wrapped: &InteropHandle) -> Result<(), GpuError> {
        self.log.releases.fetch_add(1, Ordering::SeqCst);
        self.log
            .mappings_at_release
            .lock()
            .push(driver(|d| d.live_mappings));
        self.log.event("release");
        Ok(())
    }

    fn flush(&mut self) {
        self.log.flushes.fetch_add(1, Ordering::SeqCst);
        self.log.event("flush");
    }

    fn destroy(&mut self, handle: InteropHandle) {
        self.log.destroys.fetch_add(1, Ordering::SeqCst);
        let _ = handle.into_raw();
    }

    fn shutdown(&mut self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.log.event("shutdown");
    }
}

// ---------------------------------------------------------------------------
// Fake probe devices
// ---------------------------------------------------------------------------

pub const PROBE_DEVICE: usize = 0xDE11_0000;

#[derive(Default)]
pub struct FakeDevices {
    pub created: AtomicUsize,
    pub dropped: Arc<AtomicUsize>,
    pub fail: AtomicBool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn live(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.dropped.load(Ordering::SeqCst)
    }
}

struct FakeProbeDevice {
    dropped: Arc<AtomicUsize>,
}

impl ProbeDevice for FakeProbeDevice {
    fn device(&self) -> GpuDeviceRef {
        GpuDeviceRef::new(GraphicsApi::D3D11, PROBE_DEVICE as *mut c_void)
    }
}

impl Drop for FakeProbeDevice {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl DeviceProvider for FakeDevices {
    fn create_probe_device(&self) -> Result<Box<dyn ProbeDevice>, GpuError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GpuError::DeviceInit("D3D11CreateDevice failed".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProbeDevice {
            dropped: Arc::clone(&self.dropped),
        }))
    }

    fn adapter_info(&self) -> Option<AdapterInfo> {
        Some(AdapterInfo {
            name: "NVIDIA GeForce RTX 4070".to_string(),
            driver_version: "555.85".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fences and handles
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingFence {
    pub waits: AtomicUsize,
}

impl GpuFence for CountingFence {
    fn wait(&self) -> Result<(), GpuError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn d3d11_device() -> GpuDeviceRef {
    GpuDeviceRef::new(GraphicsApi::D3D11, 0xD311_1000 as *mut c_void)
}

pub fn d3d12_device() -> GpuDeviceRef {
    GpuDeviceRef::new(GraphicsApi::D3D12, 0xD312_1000 as *mut c_void)
}

pub fn texture(id: u64, format: PixelFormat) -> TextureRef {
    TextureRef {
        id: ResourceId(id),
        raw: (0x5000_0000 + id as usize * 0x1000) as *mut c_void,
        width: 1280,
        height: 720,
        format,
    }
}

/// Context wired to the fake driver, fake probe devices and fake interop.
pub fn fake_context() -> (EncoderContext, Arc<FakeModules>, Arc<FakeDevices>, Arc<InteropLog>) {
    let modules = FakeModules::present();
    let devices = FakeDevices::new();
    let (interop, log) = FakeInteropFactory::new();
    let context = EncoderContext::new(modules.clone(), devices.clone(), interop);
    (context, modules, devices, log)
}
