//! Host class system
//!
//! Class objects describe native-visible classes: their instance size and
//! alignment, flags, the construction/reference-collection routines shared
//! with their parent, and the linked property layout. The registry is the
//! global namespace classes are found in, plus the queue of compiled-in
//! registrations that are processed after a module (or managed plugin)
//! finishes loading.

use core::ffi::c_void;
use core::fmt;
use core::ops::BitOr;
use core::ptr::NonNull;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::ClassRegistryError;

/// Constructs an instance of a class in place
pub type ClassConstructorFn = unsafe extern "C" fn(object: *mut c_void);
/// Builds a throwaway instance used to recover a vtable
pub type VTableHelperCtorCallerFn = unsafe extern "C" fn(helper: *mut c_void) -> *mut c_void;
/// Reports the objects an instance references to the collector
pub type AddReferencedObjectsFn = unsafe extern "C" fn(object: *mut c_void, collector: *mut c_void);
/// Returns the singleton class object for a compiled-in registration
pub type ClassAccessorFn = unsafe extern "C" fn() -> *mut ClassObject;

/// Class flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClassFlags(pub u32);

impl ClassFlags {
    pub const NONE: Self = Self(0);
    pub const ABSTRACT: Self = Self(0x0000_0001);
    pub const CONFIG: Self = Self(0x0000_0004);
    pub const TRANSIENT: Self = Self(0x0000_0008);
    pub const NATIVE: Self = Self(0x0000_0080);
    /// Set once the property layout has been linked
    pub const CONSTRUCTED: Self = Self(0x0010_0000);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClassFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Cast flags used for fast type checks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CastFlags(pub u64);

/// Object flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObjectFlags(pub u32);

impl ObjectFlags {
    pub const NONE: Self = Self(0);
    pub const PUBLIC: Self = Self(0x0000_0001);
    pub const STANDALONE: Self = Self(0x0000_0002);
    pub const MARK_AS_NATIVE: Self = Self(0x0000_0004);
    pub const TRANSIENT: Self = Self(0x0000_0040);
    pub const MARK_AS_ROOT_SET: Self = Self(0x0000_0080);

    /// Flags every statically registered class object carries
    pub const STATIC_CLASS: Self = Self(
        Self::PUBLIC.0 | Self::STANDALONE.0 | Self::TRANSIENT.0 | Self::MARK_AS_NATIVE.0 | Self::MARK_AS_ROOT_SET.0,
    );

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Construction and garbage-collection routines of a class.
///
/// Derived classes that only add data fields share these with their parent.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassVTable {
    pub constructor: Option<ClassConstructorFn>,
    pub vtable_helper_ctor_caller: Option<VTableHelperCtorCallerFn>,
    pub add_referenced_objects: Option<AddReferencedObjectsFn>,
}

/// A linked property of a class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

/// Parameters for constructing a class object
#[derive(Clone, Debug, Default)]
pub struct ClassObjectParams {
    pub name: String,
    pub properties_size: usize,
    pub min_alignment: usize,
    pub class_flags: ClassFlags,
    pub cast_flags: CastFlags,
    pub config_name: Option<String>,
    pub object_flags: ObjectFlags,
    pub vtable: ClassVTable,
}

/// A native-visible class
pub struct ClassObject {
    name: String,
    package: String,
    properties_size: usize,
    min_alignment: usize,
    class_flags: ClassFlags,
    cast_flags: CastFlags,
    config_name: Option<String>,
    object_flags: ObjectFlags,
    vtable: ClassVTable,
    super_class: Option<ClassRef>,
    within: Option<ClassRef>,
    properties: Vec<PropertyInfo>,
    static_initialized: bool,
}

impl ClassObject {
    /// Create an unbound class object
    pub fn new(params: ClassObjectParams) -> Self {
        Self {
            name: params.name,
            package: String::new(),
            properties_size: params.properties_size,
            min_alignment: params.min_alignment,
            class_flags: params.class_flags,
            cast_flags: params.cast_flags,
            config_name: params.config_name,
            object_flags: params.object_flags,
            vtable: params.vtable,
            super_class: None,
            within: None,
            properties: Vec::new(),
            static_initialized: false,
        }
    }

    /// Bind the class to its parent, its outer (`within`) class and its package
    pub fn initialize_static(&mut self, super_class: Option<ClassRef>, within: Option<ClassRef>, package: &str) {
        self.super_class = super_class;
        self.within = within;
        self.package = package.into();
        self.static_initialized = true;
    }

    /// Attach the computed property layout
    pub fn link_properties(&mut self, properties: Vec<PropertyInfo>) {
        self.properties = properties;
        self.class_flags = self.class_flags | ClassFlags::CONSTRUCTED;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Instance size in bytes
    pub fn properties_size(&self) -> usize {
        self.properties_size
    }

    pub fn min_alignment(&self) -> usize {
        self.min_alignment
    }

    pub fn class_flags(&self) -> ClassFlags {
        self.class_flags
    }

    pub fn cast_flags(&self) -> CastFlags {
        self.cast_flags
    }

    pub fn config_name(&self) -> Option<&str> {
        self.config_name.as_deref()
    }

    pub fn object_flags(&self) -> ObjectFlags {
        self.object_flags
    }

    pub fn vtable(&self) -> &ClassVTable {
        &self.vtable
    }

    pub fn super_class(&self) -> Option<ClassRef> {
        self.super_class
    }

    pub fn within(&self) -> Option<ClassRef> {
        self.within
    }

    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    pub fn is_static_initialized(&self) -> bool {
        self.static_initialized
    }

    pub fn is_linked(&self) -> bool {
        self.class_flags.contains(ClassFlags::CONSTRUCTED)
    }

    /// Check if this class is `ancestor` or derives from it
    ///
    /// # Safety
    /// Every class in the parent chain must still be alive.
    pub unsafe fn is_child_of(&self, ancestor: ClassRef) -> bool {
        let mut current: *const ClassObject = self;
        loop {
            if core::ptr::eq(current, ancestor.as_ptr()) {
                return true;
            }
            match (*current).super_class {
                Some(parent) => current = parent.as_ptr(),
                None => return false,
            }
        }
    }
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassObject")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("properties_size", &self.properties_size)
            .field("min_alignment", &self.min_alignment)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Pointer to a class object owned by the global object allocator.
///
/// Class objects are root-set allocations that live as long as the allocator
/// that produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClassRef(NonNull<ClassObject>);

// Safety: class objects are only mutated during registration, which the host
// drives from one thread
unsafe impl Send for ClassRef {}
unsafe impl Sync for ClassRef {}

impl ClassRef {
    /// Wrap a raw pointer, `None` if null
    pub fn from_raw(ptr: *mut ClassObject) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn from_non_null(ptr: NonNull<ClassObject>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut ClassObject {
        self.0.as_ptr()
    }

    /// # Safety
    /// The class object must still be alive and not mutably borrowed.
    pub unsafe fn as_ref<'a>(self) -> &'a ClassObject {
        &*self.0.as_ptr()
    }

    /// # Safety
    /// The class object must still be alive and not borrowed elsewhere.
    pub unsafe fn as_mut<'a>(self) -> &'a mut ClassObject {
        &mut *self.0.as_ptr()
    }
}

/// A registration waiting to be processed by the host
pub struct CompiledInClass {
    pub package: String,
    pub name: String,
    /// Fully constructs the class (layout linked)
    pub outer_register: ClassAccessorFn,
    /// Returns the class object without linking
    pub inner_register: ClassAccessorFn,
    /// Opaque bookkeeping block owned by whoever registered the class
    pub registration_info: *mut c_void,
}

// Safety: the registration info block is owned by the registering side and
// only handed back to it through the accessors
unsafe impl Send for CompiledInClass {}
unsafe impl Sync for CompiledInClass {}

impl fmt::Debug for CompiledInClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledInClass")
            .field("package", &self.package)
            .field("name", &self.name)
            .finish()
    }
}

/// Global class namespace and compiled-in registration queue
pub struct ClassRegistry {
    /// Classes by name, regardless of package
    by_name: BTreeMap<String, ClassRef>,
    /// Every package/class pair ever registered as compiled-in
    compiled_in: BTreeSet<(String, String)>,
    /// Registrations not yet processed
    pending: Vec<CompiledInClass>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            by_name: BTreeMap::new(),
            compiled_in: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    /// Add a class to the namespace.
    ///
    /// Adding the same object twice is accepted; a different object under an
    /// existing name is rejected.
    pub fn add(&mut self, name: &str, class: ClassRef) -> Result<(), ClassRegistryError> {
        match self.by_name.get(name) {
            Some(existing) if *existing == class => Ok(()),
            Some(_) => Err(ClassRegistryError::AlreadyRegistered(name.into())),
            None => {
                self.by_name.insert(name.into(), class);
                Ok(())
            }
        }
    }

    /// Find a class by name in any package
    pub fn find(&self, name: &str) -> Option<ClassRef> {
        self.by_name.get(name).copied()
    }

    /// Check if a class is in the namespace
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Queue a compiled-in registration
    pub fn register_compiled_in(&mut self, class: CompiledInClass) -> Result<(), ClassRegistryError> {
        let key = (class.package.clone(), class.name.clone());
        if self.compiled_in.contains(&key) {
            return Err(ClassRegistryError::DuplicateCompiledIn {
                package: key.0.into(),
                class: key.1.into(),
            });
        }

        self.compiled_in.insert(key);
        self.pending.push(class);
        Ok(())
    }

    /// Remove and return all unprocessed registrations
    pub fn take_pending(&mut self) -> Vec<CompiledInClass> {
        core::mem::take(&mut self.pending)
    }

    /// Check if a package/class pair was registered as compiled-in
    pub fn is_compiled_in(&self, package: &str, name: &str) -> bool {
        self.compiled_in.iter().any(|(p, n)| p == package && n == name)
    }

    /// Number of registrations waiting to be processed
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Iterate over class names in the namespace
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Number of classes in the namespace
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.by_name.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
