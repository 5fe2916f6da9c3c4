//! FFI types and function signatures for .NET interop
//!
//! This module defines the C ABI shared with the hosting library (`hostfxr`)
//! and with the managed plugin loader. All types use `#[repr(C)]` and mirror
//! the managed-side declarations field for field.

use std::ffi::c_void;

use void_core::{ClassAccessorFn, ClassObject, ClassRef};
use widestring::U16CStr;

use crate::error::{BridgeError, DotNetError, Result};

// ---------------------------------------------------------------------------
// hostfxr
// ---------------------------------------------------------------------------

/// Platform character type of the hosting API
#[cfg(windows)]
pub type PdChar = u16;
/// Platform character type of the hosting API
#[cfg(not(windows))]
pub type PdChar = std::ffi::c_char;

/// Opaque host context handle
pub type HostFxrHandle = *mut c_void;

/// Optional parameters for context initialization
#[repr(C)]
#[derive(Debug)]
pub struct HostFxrInitializeParameters {
    pub size: usize,
    pub host_path: *const PdChar,
    pub dotnet_root: *const PdChar,
}

pub type HostFxrInitializeForRuntimeConfigFn = unsafe extern "C" fn(
    runtime_config_path: *const PdChar,
    parameters: *const HostFxrInitializeParameters,
    host_context_handle: *mut HostFxrHandle,
) -> i32;

pub type HostFxrGetRuntimeDelegateFn =
    unsafe extern "C" fn(host_context_handle: HostFxrHandle, delegate_type: i32, delegate: *mut *mut c_void) -> i32;

pub type HostFxrCloseFn = unsafe extern "C" fn(host_context_handle: HostFxrHandle) -> i32;

pub type HostFxrErrorWriterFn = unsafe extern "C" fn(message: *const PdChar);

pub type HostFxrSetErrorWriterFn =
    unsafe extern "C" fn(error_writer: Option<HostFxrErrorWriterFn>) -> Option<HostFxrErrorWriterFn>;

/// Runtime delegate that loads an assembly and resolves a static method
pub type LoadAssemblyAndGetFunctionPointerFn = unsafe extern "C" fn(
    assembly_path: *const PdChar,
    type_name: *const PdChar,
    method_name: *const PdChar,
    delegate_type_name: *const PdChar,
    reserved: *mut c_void,
    delegate: *mut *mut c_void,
) -> i32;

/// `hdt_load_assembly_and_get_function_pointer`
pub const HDT_LOAD_ASSEMBLY_AND_GET_FUNCTION_POINTER: i32 = 5;

/// Delegate type name sentinel for `[UnmanagedCallersOnly]` methods
pub const UNMANAGEDCALLERSONLY_METHOD: *const PdChar = usize::MAX as *const PdChar;

// ---------------------------------------------------------------------------
// Managed class descriptors
// ---------------------------------------------------------------------------

/// A property of a managed class
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiPropertyDescriptor {
    /// UTF-16, NUL-terminated
    pub name: *const u16,
    pub flags: u64,
    /// Size in bytes, written by managed code
    pub size: i32,
    /// Byte offset in the instance, written by the bridge
    pub offset: i32,
}

impl FfiPropertyDescriptor {
    /// Property name, `"<unnamed>"` when missing or not valid UTF-16
    pub fn display_name(&self) -> String {
        unsafe { read_utf16(self.name) }.unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// Construction state of a singleton slot
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty = 0,
    Created = 1,
}

/// A lazily constructed class object
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiSingletonSlot {
    /// Raw [`SlotState`]
    pub state: u8,
    pub object: *mut ClassObject,
}

impl FfiSingletonSlot {
    pub const fn empty() -> Self {
        Self { state: SlotState::Empty as u8, object: std::ptr::null_mut() }
    }

    /// Any byte other than `Created` reads as empty
    pub fn state(&self) -> SlotState {
        if self.state == SlotState::Created as u8 && !self.object.is_null() {
            SlotState::Created
        } else {
            SlotState::Empty
        }
    }

    pub fn get(&self) -> Option<ClassRef> {
        match self.state() {
            SlotState::Created => ClassRef::from_raw(self.object),
            SlotState::Empty => None,
        }
    }

    pub fn set(&mut self, class: ClassRef) {
        self.object = class.as_ptr();
        self.state = SlotState::Created as u8;
    }
}

impl Default for FfiSingletonSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Singleton bookkeeping of one managed class
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FfiClassRegistrationInfo {
    pub outer_singleton: FfiSingletonSlot,
    pub inner_singleton: FfiSingletonSlot,
}

/// Class definition produced by managed code.
///
/// Owned by managed code. The native side only writes property offsets,
/// `properties_size`, `min_alignment`, `base_class`, the singleton slots and
/// `is_registered`.
#[repr(C)]
#[derive(Debug)]
pub struct FfiManagedClassDescriptor {
    pub class_name: *const u16,
    pub package_name: *const u16,
    pub parent_name: *const u16,
    /// May be null
    pub config_name: *const u16,
    pub class_flags: u32,
    pub cast_flags: u64,
    pub registration_info: *mut FfiClassRegistrationInfo,
    pub properties: *mut FfiPropertyDescriptor,
    pub property_count: i32,
    pub properties_size: i32,
    pub min_alignment: i32,
    pub is_registered: u8,
    pub base_class: *mut ClassObject,
    /// Managed accessor returning the fully constructed class
    pub outer_register: Option<ClassAccessorFn>,
    /// Managed accessor returning the class object without linking
    pub inner_register: Option<ClassAccessorFn>,
}

impl FfiManagedClassDescriptor {
    pub fn is_registered(&self) -> bool {
        self.is_registered != 0
    }

    /// # Safety
    /// `class_name` must be null or a NUL-terminated UTF-16 string.
    pub unsafe fn class_name(&self) -> std::result::Result<String, BridgeError> {
        read_utf16(self.class_name).ok_or(BridgeError::InvalidName { field: "class name" })
    }

    /// # Safety
    /// `package_name` must be null or a NUL-terminated UTF-16 string.
    pub unsafe fn package_name(&self) -> std::result::Result<String, BridgeError> {
        read_utf16(self.package_name).ok_or(BridgeError::InvalidName { field: "package name" })
    }

    /// # Safety
    /// `parent_name` must be null or a NUL-terminated UTF-16 string.
    pub unsafe fn parent_name(&self) -> std::result::Result<String, BridgeError> {
        read_utf16(self.parent_name).ok_or(BridgeError::InvalidName { field: "parent name" })
    }

    /// # Safety
    /// `config_name` must be null or a NUL-terminated UTF-16 string.
    pub unsafe fn config_name(&self) -> Option<String> {
        read_utf16(self.config_name).filter(|name| !name.is_empty())
    }

    /// # Safety
    /// `properties` must point to `property_count` descriptors, or be null.
    pub unsafe fn properties(&self) -> &[FfiPropertyDescriptor] {
        if self.properties.is_null() || self.property_count <= 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.properties, self.property_count as usize)
    }

    /// # Safety
    /// `properties` must point to `property_count` descriptors, or be null.
    pub unsafe fn properties_mut(&mut self) -> &mut [FfiPropertyDescriptor] {
        if self.properties.is_null() || self.property_count <= 0 {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.properties, self.property_count as usize)
    }

    /// # Safety
    /// `registration_info` must be null or valid for writes.
    pub unsafe fn registration_info_mut(&mut self) -> Option<&mut FfiClassRegistrationInfo> {
        self.registration_info.as_mut()
    }
}

/// # Safety
/// `text` must be null or a NUL-terminated UTF-16 string.
pub unsafe fn read_utf16(text: *const u16) -> Option<String> {
    if text.is_null() {
        return None;
    }
    U16CStr::from_ptr_str(text).to_string().ok()
}

// ---------------------------------------------------------------------------
// Delegate tables
// ---------------------------------------------------------------------------

/// Managed log sink: verbosity, UTF-16 text, length in code units
pub type LogFn = unsafe extern "C" fn(verbosity: u8, text: *const u16, length: i32);

/// Returns one of the two singletons of a managed class
pub type RegisterAccessorFn = unsafe extern "C" fn(descriptor: *mut FfiManagedClassDescriptor) -> *mut ClassObject;

/// Registers a managed class with the host
pub type RegisterManagedClassFn = unsafe extern "C" fn(descriptor: *mut FfiManagedClassDescriptor);

/// Native functions handed to managed code, in contract order
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeDelegateTable {
    pub log: LogFn,
    pub outer_register_internal: RegisterAccessorFn,
    pub inner_register_internal: RegisterAccessorFn,
    pub register_managed_class: RegisterManagedClassFn,
}

/// Parameterless managed plugin lifecycle call
pub type ManagedActionFn = unsafe extern "C" fn();

/// Managed plugin lifecycle functions, filled in by the loader entry point
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ManagedDelegateTable {
    pub load: Option<ManagedActionFn>,
    pub unload: Option<ManagedActionFn>,
    pub reload: Option<ManagedActionFn>,
}

impl ManagedDelegateTable {
    /// Check if managed code provided every delegate
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Names of the delegates managed code did not provide
    pub fn missing(&self) -> Vec<&'static str> {
        [("load", self.load), ("unload", self.unload), ("reload", self.reload)]
            .into_iter()
            .filter(|(_, delegate)| delegate.is_none())
            .map(|(name, _)| name)
            .collect()
    }

    /// Forget all delegates
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Call the managed `Load`
    pub fn call_load(&self) -> Result<()> {
        Self::call("load", self.load)
    }

    /// Call the managed `Unload`
    pub fn call_unload(&self) -> Result<()> {
        Self::call("unload", self.unload)
    }

    /// Call the managed `Reload`
    pub fn call_reload(&self) -> Result<()> {
        Self::call("reload", self.reload)
    }

    fn call(name: &'static str, delegate: Option<ManagedActionFn>) -> Result<()> {
        let delegate = delegate.ok_or(DotNetError::ManagedDelegateMissing(name))?;
        unsafe { delegate() };
        Ok(())
    }
}

/// Managed loader entry point
pub type ManagedEntryPointFn = unsafe extern "C" fn(
    plugins_path: *const u16,
    plugins_path_len: i32,
    native: *const NativeDelegateTable,
    managed: *mut ManagedDelegateTable,
);
