mod common;

use std::ffi::c_void;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{
    d3d11_device, d3d12_device, driver, fail, reset_driver, texture, FakeInteropFactory,
    FakeModules, InteropLog, INTEROP_D3D11_DEVICE,
};
use hwenc_common::{
    EncodeError, GpuDeviceRef, GraphicsApi, LayerConfig, PixelFormat, ResourceId, VideoCodec,
};
use hwenc_encoder::nvenc::ffi::*;
use hwenc_encoder::nvenc::{EncoderSession, ParameterMapper, RuntimeLoader};
use hwenc_encoder::ResourceBridge;
use hwenc_gpu_hal::{BridgeKind, UnsupportedPlatform};

/// Bridge for `device`, prepared and bound to an initialized session.
fn bound_bridge(
    device: GpuDeviceRef,
    interop: Arc<FakeInteropFactory>,
) -> (ResourceBridge, EncoderSession) {
    let mut bridge = ResourceBridge::for_device(&device, interop);
    let encoder_device = bridge.prepare(&device).unwrap();

    let mut session = EncoderSession::new(Arc::new(RuntimeLoader::new(FakeModules::present())));
    session.open(VideoCodec::H264, &encoder_device).unwrap();
    let layer = LayerConfig {
        width: 1280,
        height: 720,
        ..LayerConfig::default()
    };
    session
        .initialize(&ParameterMapper::from_layer_config(
            &layer,
            VideoCodec::H264,
            PixelFormat::Nv12,
        ))
        .unwrap();
    bridge
        .bind_session(&encoder_device, session.binding().unwrap())
        .unwrap();
    (bridge, session)
}

fn count(counter: &std::sync::atomic::AtomicUsize) -> usize {
    InteropLog::get(counter)
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[test]
fn bridge_kind_follows_device_api() {
    let interop = Arc::new(UnsupportedPlatform);
    assert_eq!(
        ResourceBridge::for_device(&d3d11_device(), interop.clone()).kind(),
        BridgeKind::Direct
    );
    assert_eq!(
        ResourceBridge::for_device(&d3d12_device(), interop.clone()).kind(),
        BridgeKind::CrossApi
    );
    let vulkan = GpuDeviceRef::new(GraphicsApi::Vulkan, 0x1 as *mut c_void);
    assert_eq!(
        ResourceBridge::for_device(&vulkan, interop).kind(),
        BridgeKind::Unavailable
    );
}

#[test]
fn unavailable_bridge_rejects_everything() {
    let vulkan = GpuDeviceRef::new(GraphicsApi::Vulkan, 0x1 as *mut c_void);
    let mut bridge = ResourceBridge::for_device(&vulkan, Arc::new(UnsupportedPlatform));
    let tex = texture(1, PixelFormat::Nv12);

    assert!(matches!(bridge.prepare(&vulkan), Err(EncodeError::ResourceBridge(_))));
    assert!(matches!(bridge.register(&tex), Err(EncodeError::ResourceBridge(_))));
    assert!(matches!(bridge.map(&tex), Err(EncodeError::ResourceBridge(_))));
    assert!(matches!(
        bridge.unregister(tex.id),
        Err(EncodeError::ResourceBridge(_))
    ));
    bridge.shutdown();
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

#[test]
fn direct_prepare_returns_the_source_device() {
    let (interop, _log) = FakeInteropFactory::new();
    let mut bridge = ResourceBridge::for_device(&d3d11_device(), interop);
    assert_eq!(bridge.prepare(&d3d11_device()).unwrap(), d3d11_device());
}

#[test]
fn direct_register_is_idempotent_per_identity() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    let tex = texture(1, PixelFormat::Nv12);

    assert_eq!(bridge.register(&tex).unwrap(), tex.raw);
    assert_eq!(bridge.register(&tex).unwrap(), tex.raw);
    driver(|d| {
        assert_eq!(d.count("NvEncRegisterResource"), 1);
        assert_eq!(d.registered_resources, vec![tex.raw as usize]);
        assert_eq!(d.registered_types, vec![NvEncInputResourceType::Directx as u32]);
    });
}

#[test]
fn direct_map_requires_registration() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);

    let err = bridge.map(&texture(7, PixelFormat::Nv12)).unwrap_err();
    assert!(matches!(err, EncodeError::ResourceBridge(_)));
    assert_eq!(driver(|d| d.count("NvEncMapInputResource")), 0);
}

#[test]
fn direct_map_unmap_round() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    let tex = texture(1, PixelFormat::Nv12);
    bridge.register(&tex).unwrap();

    let mapped = bridge.map(&tex).unwrap();
    assert_eq!(mapped.id, tex.id);
    assert_eq!((mapped.width, mapped.height), (1280, 720));
    // The driver leaves the mapped format undefined; the registration format
    // fills in.
    assert_eq!(mapped.format, NvEncBufferFormat::Nv12);
    assert!(!mapped.handle.is_null());

    assert!(matches!(bridge.map(&tex), Err(EncodeError::ResourceBridge(_))));
    bridge.unmap(mapped).unwrap();
    assert_eq!(driver(|d| d.live_mappings), 0);
}

#[test]
fn scoped_mapping_unmaps_on_drop() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    let tex = texture(1, PixelFormat::Nv12);
    bridge.register(&tex).unwrap();

    {
        let frame = bridge.map_scoped(&tex).unwrap();
        assert!(frame.input().is_some());
        assert_eq!(driver(|d| d.live_mappings), 1);
    }
    assert_eq!(driver(|d| d.live_mappings), 0);

    // Mappable again once the guard is gone.
    let frame = bridge.map_scoped(&tex).unwrap();
    frame.unmap().unwrap();
    assert_eq!(driver(|d| d.count("NvEncUnmapInputResource")), 2);
}

#[test]
fn direct_unregister_unknown_identity_fails() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    assert!(matches!(
        bridge.unregister(ResourceId(99)),
        Err(EncodeError::ResourceBridge(_))
    ));
}

#[test]
fn direct_unregister_unmaps_first() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    let tex = texture(1, PixelFormat::Nv12);
    bridge.register(&tex).unwrap();
    let _mapped = bridge.map(&tex).unwrap();

    bridge.unregister(tex.id).unwrap();
    driver(|d| {
        assert!(d.position("NvEncUnmapInputResource") < d.position("NvEncUnregisterResource"));
        assert_eq!(d.live_registrations, 0);
        assert_eq!(d.live_mappings, 0);
    });
}

#[test]
fn direct_register_failure_is_reported() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    fail("NvEncRegisterResource", NV_ENC_ERR_INVALID_PARAM);

    let tex = texture(1, PixelFormat::Nv12);
    assert!(bridge.register(&tex).is_err());
    // Nothing was recorded, so a map still reports "not registered".
    assert!(bridge.map(&tex).is_err());
    assert_eq!(driver(|d| d.count("NvEncMapInputResource")), 0);
}

#[test]
fn direct_shutdown_releases_everything() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d11_device(), interop);
    for id in 1..=3 {
        bridge.register(&texture(id, PixelFormat::Nv12)).unwrap();
    }
    let _mapped = bridge.map(&texture(2, PixelFormat::Nv12)).unwrap();

    bridge.shutdown();
    bridge.shutdown();
    driver(|d| {
        assert_eq!(d.live_registrations, 0);
        assert_eq!(d.live_mappings, 0);
        assert_eq!(d.count("NvEncUnregisterResource"), 3);
        assert!(d.last_position("NvEncUnmapInputResource") < d.position("NvEncUnregisterResource"));
    });
}

// ---------------------------------------------------------------------------
// Cross-API
// ---------------------------------------------------------------------------

#[test]
fn cross_api_prepare_returns_the_interop_device() {
    let (interop, log) = FakeInteropFactory::new();
    let mut bridge = ResourceBridge::for_device(&d3d12_device(), interop);

    let device = bridge.prepare(&d3d12_device()).unwrap();
    assert_eq!(device.api, GraphicsApi::D3D11);
    assert_eq!(device.raw as usize, INTEROP_D3D11_DEVICE);

    // Idempotent: the interop device is created once.
    bridge.prepare(&d3d12_device()).unwrap();
    assert_eq!(count(&log.creates), 1);
}

#[test]
fn cross_api_interop_failure_is_reported() {
    let (interop, log) = FakeInteropFactory::new();
    log.fail_create.store(true, Ordering::SeqCst);
    let mut bridge = ResourceBridge::for_device(&d3d12_device(), interop);
    assert!(matches!(
        bridge.prepare(&d3d12_device()),
        Err(EncodeError::Gpu(_))
    ));
}

#[test]
fn cross_api_register_twice_returns_the_same_view() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    let tex = texture(5, PixelFormat::Nv12);

    let first = bridge.register(&tex).unwrap();
    let second = bridge.register(&tex).unwrap();

    assert_eq!(first, second);
    assert_ne!(first, tex.raw);
    assert_eq!(count(&log.wraps), 1);
    assert_eq!(count(&log.views), 1);
    driver(|d| {
        assert_eq!(d.count("NvEncRegisterResource"), 1);
        assert_eq!(d.registered_resources, vec![first as usize]);
    });
}

#[test]
fn cross_api_unregister_then_register_wraps_again() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    let tex = texture(5, PixelFormat::Nv12);

    bridge.register(&tex).unwrap();
    bridge.unregister(tex.id).unwrap();
    assert_eq!(count(&log.destroys), 2);
    assert_eq!(driver(|d| d.live_registrations), 0);

    bridge.register(&tex).unwrap();
    assert_eq!(count(&log.wraps), 2);
    assert_eq!(driver(|d| d.count("NvEncRegisterResource")), 2);
}

#[test]
fn cross_api_unregister_unknown_identity_fails() {
    reset_driver();
    let (interop, _log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    assert!(matches!(
        bridge.unregister(ResourceId(42)),
        Err(EncodeError::ResourceBridge(_))
    ));
}

#[test]
fn cross_api_map_acquires_and_unmap_releases() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    let tex = texture(5, PixelFormat::Nv12);

    let mapped = bridge.map(&tex).unwrap();
    assert_eq!(count(&log.wraps), 1);
    assert_eq!(count(&log.acquires), 1);
    assert_eq!(count(&log.releases), 0);

    bridge.unmap(mapped).unwrap();
    assert_eq!(count(&log.releases), 1);
    assert_eq!(count(&log.flushes), 1);
    assert_eq!(log.events(), vec!["create", "wrap R5", "acquire", "release", "flush"]);
    assert_eq!(*log.mappings_at_release.lock(), vec![0]);
    assert_eq!(driver(|d| d.live_mappings), 0);
}

#[test]
fn cross_api_acquire_failure_leaves_nothing_mapped() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    log.fail_acquire.store(true, Ordering::SeqCst);

    let tex = texture(5, PixelFormat::Nv12);
    assert!(matches!(bridge.map(&tex), Err(EncodeError::ResourceBridge(_))));
    assert_eq!(driver(|d| d.live_mappings), 0);

    // The wrapper stays cached; the next frame only retries the acquire.
    log.fail_acquire.store(false, Ordering::SeqCst);
    let mapped = bridge.map(&tex).unwrap();
    bridge.unmap(mapped).unwrap();
    assert_eq!(count(&log.wraps), 1);
}

#[test]
fn cross_api_map_failure_releases_the_acquire() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    fail("NvEncMapInputResource", NV_ENC_ERR_INVALID_PARAM);

    assert!(bridge.map(&texture(5, PixelFormat::Nv12)).is_err());
    assert_eq!(count(&log.acquires), 1);
    assert_eq!(count(&log.releases), 1);
}

#[test]
fn cross_api_wrap_failure_caches_nothing() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    log.fail_wrap.store(true, Ordering::SeqCst);

    assert!(bridge.register(&texture(5, PixelFormat::Nv12)).is_err());
    assert_eq!(driver(|d| d.count("NvEncRegisterResource")), 0);

    log.fail_wrap.store(false, Ordering::SeqCst);
    bridge.register(&texture(5, PixelFormat::Nv12)).unwrap();
    assert_eq!(count(&log.wraps), 1);
}

#[test]
fn cross_api_shutdown_releases_before_tearing_down_interop() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    bridge.register(&texture(1, PixelFormat::Nv12)).unwrap();
    let _mapped = bridge.map(&texture(2, PixelFormat::Nv12)).unwrap();

    bridge.shutdown();

    let events = log.events();
    let release = events.iter().position(|e| e == "release").unwrap();
    let shutdown = events.iter().position(|e| e == "shutdown").unwrap();
    assert!(release < shutdown);
    assert_eq!(events.last().map(String::as_str), Some("shutdown"));
    assert_eq!(count(&log.shutdowns), 1);
    assert_eq!(count(&log.destroys), 4);
    driver(|d| {
        assert_eq!(d.live_registrations, 0);
        assert_eq!(d.live_mappings, 0);
    });

    // A second shutdown has nothing left to do.
    bridge.shutdown();
    assert_eq!(count(&log.shutdowns), 1);
}

#[test]
fn cross_api_shutdown_unmaps_before_releasing_in_flight_frame() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    let _mapped = bridge.map(&texture(3, PixelFormat::Nv12)).unwrap();
    assert_eq!(driver(|d| d.live_mappings), 1);

    bridge.shutdown();

    assert_eq!(*log.mappings_at_release.lock(), vec![0]);
    let unmap = driver(|d| d.last_position("NvEncUnmapInputResource")).unwrap();
    let unregister = driver(|d| d.last_position("NvEncUnregisterResource")).unwrap();
    assert!(unmap < unregister);
    let events = log.events();
    let release = events.iter().position(|e| e == "release").unwrap();
    assert_eq!(events[release + 1], "flush");
}

#[test]
fn cross_api_unregister_unmaps_before_releasing_in_flight_frame() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    let _mapped = bridge.map(&texture(3, PixelFormat::Nv12)).unwrap();

    bridge.unregister(ResourceId(3)).unwrap();

    assert_eq!(*log.mappings_at_release.lock(), vec![0]);
    assert_eq!(count(&log.releases), 1);
    assert_eq!(count(&log.destroys), 2);
    driver(|d| {
        assert_eq!(d.live_mappings, 0);
        assert_eq!(d.live_registrations, 0);
    });
}

#[test]
fn dropping_the_bridge_shuts_it_down() {
    reset_driver();
    let (interop, log) = FakeInteropFactory::new();
    let (mut bridge, _session) = bound_bridge(d3d12_device(), interop);
    bridge.register(&texture(1, PixelFormat::Nv12)).unwrap();

    drop(bridge);
    assert_eq!(count(&log.shutdowns), 1);
    assert_eq!(driver(|d| d.live_registrations), 0);
}
