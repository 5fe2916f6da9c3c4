//! Integration tests for void_dotnet
//!
//! Runs the module lifecycle against an in-process hostfxr and managed loader:
//! runtime startup, plugin calls, managed class registration through the
//! native delegates and teardown.

use std::ffi::c_void;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use tempfile::TempDir;
use void_core::{ClassObject, ClassObjectParams};
use void_dotnet::*;
use widestring::U16CString;

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

struct CaptureLogger;

static RECORDS: Mutex<Vec<(String, log::Level, String)>> = Mutex::new(Vec::new());

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        RECORDS
            .lock()
            .push((record.target().to_string(), record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT_LOGGER: Once = Once::new();

fn count_records(target: &str, message: &str) -> usize {
    RECORDS
        .lock()
        .iter()
        .filter(|(t, _, m)| t == target && m == message)
        .count()
}

// Tests share the bridge binding and the fake runtime state
static SERIAL: Mutex<()> = Mutex::new(());

// ---------------------------------------------------------------------------
// In-process hostfxr
// ---------------------------------------------------------------------------

static CONTEXT: AtomicU8 = AtomicU8::new(0);
static INITS: AtomicUsize = AtomicUsize::new(0);
static CLOSES: AtomicUsize = AtomicUsize::new(0);
static LAST_CLOSED: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

fn context_handle() -> HostFxrHandle {
    &CONTEXT as *const AtomicU8 as HostFxrHandle
}

unsafe extern "C" fn fake_initialize(
    _config: *const PdChar,
    _parameters: *const HostFxrInitializeParameters,
    handle: *mut HostFxrHandle,
) -> i32 {
    INITS.fetch_add(1, Ordering::SeqCst);
    *handle = context_handle();
    0
}

unsafe extern "C" fn failing_initialize(
    _config: *const PdChar,
    _parameters: *const HostFxrInitializeParameters,
    handle: *mut HostFxrHandle,
) -> i32 {
    *handle = ptr::null_mut();
    // InvalidConfigFile
    0x8000_8093u32 as i32
}

unsafe extern "C" fn fake_get_runtime_delegate(_handle: HostFxrHandle, kind: i32, delegate: *mut *mut c_void) -> i32 {
    if kind != HDT_LOAD_ASSEMBLY_AND_GET_FUNCTION_POINTER {
        return -1;
    }
    *delegate = fake_load_assembly as LoadAssemblyAndGetFunctionPointerFn as *mut c_void;
    0
}

unsafe extern "C" fn fake_load_assembly(
    _assembly_path: *const PdChar,
    _type_name: *const PdChar,
    _method_name: *const PdChar,
    delegate_type_name: *const PdChar,
    _reserved: *mut c_void,
    delegate: *mut *mut c_void,
) -> i32 {
    if delegate_type_name != UNMANAGEDCALLERSONLY_METHOD {
        return -1;
    }
    *delegate = managed_init as ManagedEntryPointFn as *mut c_void;
    0
}

unsafe extern "C" fn fake_close(handle: HostFxrHandle) -> i32 {
    CLOSES.fetch_add(1, Ordering::SeqCst);
    LAST_CLOSED.store(handle, Ordering::SeqCst);
    0
}

fn exports() -> HostFxrExports {
    HostFxrExports {
        initialize_for_runtime_config: fake_initialize,
        get_runtime_delegate: fake_get_runtime_delegate,
        close: fake_close,
        set_error_writer: None,
    }
}

// ---------------------------------------------------------------------------
// In-process managed loader
// ---------------------------------------------------------------------------

static NATIVE: AtomicPtr<NativeDelegateTable> = AtomicPtr::new(ptr::null_mut());
static DESCRIPTOR: AtomicPtr<FfiManagedClassDescriptor> = AtomicPtr::new(ptr::null_mut());
static PLUGINS_PATH: Mutex<String> = Mutex::new(String::new());
static LOADS: AtomicUsize = AtomicUsize::new(0);
static UNLOADS: AtomicUsize = AtomicUsize::new(0);
static RELOADS: AtomicUsize = AtomicUsize::new(0);

unsafe fn native() -> &'static NativeDelegateTable {
    &*NATIVE.load(Ordering::SeqCst)
}

unsafe extern "C" fn managed_init(
    plugins_path: *const u16,
    plugins_path_len: i32,
    native: *const NativeDelegateTable,
    managed: *mut ManagedDelegateTable,
) {
    let path = std::slice::from_raw_parts(plugins_path, plugins_path_len as usize);
    *PLUGINS_PATH.lock() = String::from_utf16_lossy(path);
    NATIVE.store(native as *mut NativeDelegateTable, Ordering::SeqCst);

    let text: Vec<u16> = "Plugin loader initialized".encode_utf16().collect();
    ((*native).log)(4, text.as_ptr(), text.len() as i32);

    (*managed).load = Some(managed_load);
    (*managed).unload = Some(managed_unload);
    (*managed).reload = Some(managed_reload);
}

unsafe extern "C" fn managed_load() {
    LOADS.fetch_add(1, Ordering::SeqCst);
    (native().register_managed_class)(DESCRIPTOR.load(Ordering::SeqCst));
}

unsafe extern "C" fn managed_unload() {
    UNLOADS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn managed_reload() {
    RELOADS.fetch_add(1, Ordering::SeqCst);
    (native().register_managed_class)(DESCRIPTOR.load(Ordering::SeqCst));
}

unsafe extern "C" fn managed_outer_register() -> *mut ClassObject {
    (native().outer_register_internal)(DESCRIPTOR.load(Ordering::SeqCst))
}

unsafe extern "C" fn managed_inner_register() -> *mut ClassObject {
    (native().inner_register_internal)(DESCRIPTOR.load(Ordering::SeqCst))
}

fn utf16(text: &str) -> *const u16 {
    U16CString::from_str(text).unwrap().into_raw()
}

/// A `Door` class with an i64, i32, bool and pointer field
fn managed_descriptor() -> *mut FfiManagedClassDescriptor {
    let properties: Vec<FfiPropertyDescriptor> = [("Id", 8), ("Angle", 4), ("IsOpen", 1), ("Owner", 8)]
        .into_iter()
        .map(|(name, size)| FfiPropertyDescriptor { name: utf16(name), flags: 0, size, offset: 0 })
        .collect();
    let properties = Box::leak(properties.into_boxed_slice());

    Box::leak(Box::new(FfiManagedClassDescriptor {
        class_name: utf16("Door"),
        package_name: utf16("/Script/ManagedGame"),
        parent_name: utf16("Object"),
        config_name: ptr::null(),
        class_flags: 0,
        cast_flags: 0,
        registration_info: Box::leak(Box::new(FfiClassRegistrationInfo::default())),
        properties: properties.as_mut_ptr(),
        property_count: properties.len() as i32,
        properties_size: 0,
        min_alignment: 0,
        is_registered: 0,
        base_class: ptr::null_mut(),
        outer_register: Some(managed_outer_register),
        inner_register: Some(managed_inner_register),
    }))
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    _install: TempDir,
    _project: TempDir,
    settings: DotNetSettings,
    classes: Arc<EngineClassHost>,
}

fn fixture() -> Fixture {
    INIT_LOGGER.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });
    RECORDS.lock().clear();

    let install = tempfile::tempdir().unwrap();
    let fxr = install.path().join("host/fxr/8.0.1");
    std::fs::create_dir_all(&fxr).unwrap();
    std::fs::write(fxr.join(HOSTFXR_LIBRARY_NAME), b"").unwrap();

    let project = tempfile::tempdir().unwrap();
    let settings = DotNetSettings {
        dotnet_location: install.path().to_path_buf(),
        dotnet_version: "8.0.1".into(),
        allow_preview: false,
        project_dir: project.path().to_path_buf(),
        auto_load_plugins: true,
        config_path: None,
    };
    std::fs::create_dir_all(settings.managed_plugins_path()).unwrap();
    std::fs::write(settings.loader_assembly_path(), b"").unwrap();
    std::fs::write(settings.loader_config_path(), b"{}").unwrap();

    let classes = Arc::new(EngineClassHost::new());
    classes
        .register_native_class(
            ClassObjectParams {
                name: "Object".into(),
                properties_size: 40,
                min_alignment: 8,
                ..Default::default()
            },
            None,
            "/Script/CoreUObject",
        )
        .unwrap();

    DESCRIPTOR.store(managed_descriptor(), Ordering::SeqCst);

    Fixture {
        _install: install,
        _project: project,
        settings,
        classes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_runtime_lifecycle() {
    let _serial = SERIAL.lock();
    let fx = fixture();
    let loads = LOADS.load(Ordering::SeqCst);
    let closes = CLOSES.load(Ordering::SeqCst);

    let mut module = DotNetModule::with_host(fx.settings.clone(), fx.classes.clone(), HostFxr::from_exports(exports()));
    assert!(!module.is_runtime_loaded());

    module.load_runtime().unwrap();

    assert!(module.is_runtime_loaded());
    assert!(module.managed_delegates().is_complete());
    assert!(bound_class_bridge().is_some());
    assert_eq!(count_records("dotnet", ".NET runtime is loaded"), 1);
    assert_eq!(count_records(MANAGED_LOG_TARGET, "Plugin loader initialized"), 1);
    assert_eq!(*PLUGINS_PATH.lock(), fx.settings.managed_plugins_path().to_string_lossy());

    // Plugins were loaded automatically
    assert_eq!(LOADS.load(Ordering::SeqCst), loads + 1);

    module.unload_runtime().unwrap();

    assert!(!module.is_runtime_loaded());
    assert!(!module.managed_delegates().is_complete());
    assert!(bound_class_bridge().is_none());
    assert_eq!(CLOSES.load(Ordering::SeqCst), closes + 1);
    assert_eq!(LAST_CLOSED.load(Ordering::SeqCst), context_handle());
    assert!(matches!(module.load_plugins(), Err(DotNetError::RuntimeNotActive)));

    module.shutdown();
    assert!(!module.host().is_active());
}

#[test]
fn test_managed_class_registration() {
    let _serial = SERIAL.lock();
    let fx = fixture();

    let mut module = DotNetModule::with_host(fx.settings.clone(), fx.classes.clone(), HostFxr::from_exports(exports()));
    module.load_runtime().unwrap();

    let descriptor = unsafe { &*DESCRIPTOR.load(Ordering::SeqCst) };
    assert!(descriptor.is_registered());
    assert_eq!(descriptor.properties_size, 64);
    assert_eq!(descriptor.min_alignment, 8);
    let offsets: Vec<i32> = unsafe { descriptor.properties() }.iter().map(|p| p.offset).collect();
    assert_eq!(offsets, vec![40, 48, 52, 56]);

    // Constructed through the outer accessor after loading
    let door = fx.classes.find_class("Door").unwrap();
    let object = fx.classes.find_class("Object").unwrap();
    let door_object = unsafe { door.as_ref() };
    assert!(door_object.is_linked());
    assert_eq!(door_object.properties_size(), 64);
    assert_eq!(door_object.package(), "/Script/ManagedGame");
    assert_eq!(door_object.super_class(), Some(object));
    assert_eq!(door_object.properties().len(), 4);
    assert_eq!(door_object.properties()[2].name, "IsOpen");
    assert!(fx.classes.registry().is_compiled_in("/Script/ManagedGame", "Door"));

    let info = unsafe { &*descriptor.registration_info };
    assert_eq!(info.inner_singleton.get(), Some(door));
    assert_eq!(info.outer_singleton.get(), Some(door));

    // Registering again changes nothing
    let reloads = RELOADS.load(Ordering::SeqCst);
    module.reload_plugins().unwrap();
    assert_eq!(RELOADS.load(Ordering::SeqCst), reloads + 1);
    assert_eq!(fx.classes.find_class("Door"), Some(door));
    assert_eq!(descriptor.properties_size, 64);
    assert_eq!(fx.classes.registry().pending_count(), 0);

    let unloads = UNLOADS.load(Ordering::SeqCst);
    module.execute(DotNetCommand::UnloadManagedPlugins);
    assert_eq!(UNLOADS.load(Ordering::SeqCst), unloads + 1);

    module.shutdown();
}

#[test]
fn test_load_runtime_twice() {
    let _serial = SERIAL.lock();
    let fx = fixture();
    let inits = INITS.load(Ordering::SeqCst);

    let mut module = DotNetModule::with_host(
        DotNetSettings { auto_load_plugins: false, ..fx.settings.clone() },
        fx.classes.clone(),
        HostFxr::from_exports(exports()),
    );
    let loads = LOADS.load(Ordering::SeqCst);

    module.load_runtime().unwrap();
    module.load_runtime().unwrap();

    assert_eq!(INITS.load(Ordering::SeqCst), inits + 1);
    assert_eq!(LOADS.load(Ordering::SeqCst), loads);
    assert_eq!(count_records("dotnet", ".NET runtime is loaded"), 1);

    module.shutdown();
    module.shutdown();
    assert!(!module.is_runtime_loaded());
}

#[test]
fn test_failed_runtime_start() {
    let _serial = SERIAL.lock();
    let fx = fixture();

    let host = HostFxr::from_exports(HostFxrExports {
        initialize_for_runtime_config: failing_initialize,
        ..exports()
    });
    let mut module = DotNetModule::with_host(fx.settings.clone(), fx.classes.clone(), host);

    let err = module.load_runtime().unwrap_err();
    assert!(matches!(
        err,
        DotNetError::HostCall { operation: "hostfxr_initialize_for_runtime_config", .. }
    ));
    assert!(!module.is_runtime_loaded());
    assert!(bound_class_bridge().is_none());
    assert_eq!(count_records("dotnet", ".NET runtime is loaded"), 0);

    // The operator surface logs instead of failing
    module.execute(DotNetCommand::LoadRuntime);
    assert!(RECORDS
        .lock()
        .iter()
        .any(|(target, level, message)| target == "dotnet"
            && *level == log::Level::Error
            && message.starts_with("DotNet.LoadRuntime failed")));
}

#[test]
fn test_invalid_settings_leave_host_untouched() {
    let _serial = SERIAL.lock();
    let fx = fixture();
    std::fs::remove_file(fx.settings.loader_config_path()).unwrap();

    let inits = INITS.load(Ordering::SeqCst);
    let mut module = DotNetModule::with_host(fx.settings.clone(), fx.classes.clone(), HostFxr::from_exports(exports()));

    let err = module.load_runtime().unwrap_err();
    assert!(matches!(err, DotNetError::Settings(SettingsError::LoaderConfigMissing(_))));
    assert_eq!(INITS.load(Ordering::SeqCst), inits);
    assert!(Path::new(&fx.settings.managed_plugins_path()).is_dir());
}
