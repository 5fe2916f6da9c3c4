//! Managed class registration
//!
//! Turns a class descriptor built by managed code into a native class:
//! resolves the parent, lays out the new fields after the parent's data,
//! builds the inner (class object) and outer (linked class) singletons on
//! demand and queues the class with the host's compiled-in registry.
//!
//! Managed classes only add data. Construction and reference collection are
//! inherited unchanged from the parent class.

use std::sync::Arc;

use void_core::{
    CastFlags, ClassFlags, ClassObjectParams, ClassRef, ClassRegistryError, CompiledInClass, ObjectFlags, PropertyInfo,
};

use crate::error::BridgeError;
use crate::ffi::{FfiClassRegistrationInfo, FfiManagedClassDescriptor};
use crate::host::{ClassConstructionParams, ClassHost};
use crate::layout::plan_layout;

/// Registers managed classes with a [`ClassHost`]
pub struct ClassBridge {
    host: Arc<dyn ClassHost>,
}

impl ClassBridge {
    pub fn new(host: Arc<dyn ClassHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn ClassHost> {
        &self.host
    }

    /// Register a managed class.
    ///
    /// A descriptor that is already registered is left untouched. On error
    /// the descriptor is not modified and nothing is queued.
    ///
    /// # Safety
    /// `descriptor` must be null or point to a live descriptor whose strings,
    /// property array and registration info are valid.
    pub unsafe fn register(&self, descriptor: *mut FfiManagedClassDescriptor) -> Result<(), BridgeError> {
        let descriptor = descriptor.as_mut().ok_or(BridgeError::NullDescriptor)?;

        if descriptor.is_registered() {
            log::warn!(
                target: "dotnet",
                "Managed class '{}' is already registered",
                descriptor.class_name().unwrap_or_default()
            );
            return Ok(());
        }

        let class_name = descriptor.class_name()?;
        let package = descriptor.package_name()?;
        let (Some(outer_register), Some(inner_register)) = (descriptor.outer_register, descriptor.inner_register) else {
            return Err(BridgeError::MissingAccessor(class_name));
        };
        if descriptor.registration_info.is_null() {
            return Err(BridgeError::NullRegistrationInfo);
        }

        // Class names share one namespace across packages
        if self.host.find_class(&class_name).is_some() {
            return Err(ClassRegistryError::AlreadyRegistered(class_name.into()).into());
        }

        let base = self.resolve_parent(descriptor, &class_name)?;
        let base_object = base.as_ref();
        let layout = plan_layout(base_object.properties_size(), base_object.min_alignment(), descriptor.properties())?;

        self.host.register_compiled_in(CompiledInClass {
            package: package.clone(),
            name: class_name.clone(),
            outer_register,
            inner_register,
            registration_info: descriptor.registration_info.cast(),
        })?;

        layout.apply(descriptor.properties_mut());
        descriptor.properties_size = layout.properties_size as i32;
        descriptor.min_alignment = layout.min_alignment as i32;
        descriptor.base_class = base.as_ptr();
        descriptor.is_registered = 1;

        log::debug!(
            target: "dotnet",
            "Registered managed class {}.{} ({} bytes, align {}, {} properties)",
            package,
            class_name,
            layout.properties_size,
            layout.min_alignment,
            layout.properties.len()
        );
        Ok(())
    }

    unsafe fn resolve_parent(&self, descriptor: &FfiManagedClassDescriptor, class_name: &str) -> Result<ClassRef, BridgeError> {
        let parent = descriptor.parent_name()?;
        self.host.find_class(&parent).ok_or_else(|| BridgeError::ParentClassNotFound {
            class: class_name.to_string(),
            parent,
        })
    }

    /// Return the class object of a registered descriptor, creating it on first use
    ///
    /// # Safety
    /// Same contract as [`ClassBridge::register`].
    pub unsafe fn inner_register(&self, descriptor: *mut FfiManagedClassDescriptor) -> Result<ClassRef, BridgeError> {
        let descriptor = descriptor.as_mut().ok_or(BridgeError::NullDescriptor)?;

        if let Some(class) = registration_info(descriptor)?.inner_singleton.get() {
            return Ok(class);
        }

        let class_name = descriptor.class_name()?;
        let package = descriptor.package_name()?;
        let base = ClassRef::from_raw(descriptor.base_class)
            .filter(|_| descriptor.is_registered())
            .ok_or_else(|| BridgeError::NotInitialized(class_name.clone()))?;
        let base_object = base.as_ref();

        let class = self.host.allocate_class(ClassObjectParams {
            name: class_name.clone(),
            properties_size: descriptor.properties_size.max(0) as usize,
            min_alignment: descriptor.min_alignment.max(1) as usize,
            class_flags: ClassFlags(descriptor.class_flags),
            cast_flags: CastFlags(descriptor.cast_flags),
            config_name: descriptor.config_name(),
            object_flags: ObjectFlags::STATIC_CLASS,
            vtable: *base_object.vtable(),
        })?;

        self.host
            .initialize_private_static_class(Some(base), class, base_object.within(), &package, &class_name)?;

        registration_info(descriptor)?.inner_singleton.set(class);
        Ok(class)
    }

    /// Return the linked class of a registered descriptor, constructing it on first use
    ///
    /// # Safety
    /// Same contract as [`ClassBridge::register`].
    pub unsafe fn outer_register(&self, descriptor: *mut FfiManagedClassDescriptor) -> Result<ClassRef, BridgeError> {
        let params = {
            let descriptor = descriptor.as_mut().ok_or(BridgeError::NullDescriptor)?;

            if let Some(class) = registration_info(descriptor)?.outer_singleton.get() {
                return Ok(class);
            }

            let class_name = descriptor.class_name()?;
            if !descriptor.is_registered() || descriptor.base_class.is_null() {
                return Err(BridgeError::NotInitialized(class_name));
            }
            let Some(inner_register) = descriptor.inner_register else {
                return Err(BridgeError::MissingAccessor(class_name));
            };

            let properties = descriptor
                .properties()
                .iter()
                .map(|property| PropertyInfo {
                    name: property.display_name(),
                    offset: property.offset as usize,
                    size: property.size as usize,
                })
                .collect();

            ClassConstructionParams {
                class_name,
                inner_register,
                properties,
            }
        };

        // The inner accessor re-enters the bridge with this descriptor, so no
        // borrow of it may be held across the call
        let class = self.host.construct_class_from_params(params)?;

        let descriptor = &mut *descriptor;
        registration_info(descriptor)?.outer_singleton.set(class);
        Ok(class)
    }
}

unsafe fn registration_info(
    descriptor: &mut FfiManagedClassDescriptor,
) -> Result<&mut FfiClassRegistrationInfo, BridgeError> {
    descriptor.registration_info.as_mut().ok_or(BridgeError::NullRegistrationInfo)
}

impl std::fmt::Debug for ClassBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassBridge").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::FfiPropertyDescriptor;
    use crate::host::EngineClassHost;
    use std::ptr;
    use std::sync::atomic::{AtomicPtr, Ordering};
    use void_core::ClassObject;
    use widestring::U16CString;

    /// Owns everything a descriptor points at
    struct DescriptorFixture {
        _strings: Vec<U16CString>,
        _properties: Box<[FfiPropertyDescriptor]>,
        _info: Box<FfiClassRegistrationInfo>,
        descriptor: Box<FfiManagedClassDescriptor>,
    }

    impl DescriptorFixture {
        fn new(class: &str, parent: &str, sizes: &[i32]) -> Self {
            let class_name = U16CString::from_str(class).unwrap();
            let package = U16CString::from_str("/Script/Managed").unwrap();
            let parent_name = U16CString::from_str(parent).unwrap();

            let mut properties: Box<[FfiPropertyDescriptor]> = sizes
                .iter()
                .map(|&size| FfiPropertyDescriptor { name: ptr::null(), flags: 0, size, offset: 0 })
                .collect();
            let mut info = Box::new(FfiClassRegistrationInfo::default());

            let descriptor = Box::new(FfiManagedClassDescriptor {
                class_name: class_name.as_ptr(),
                package_name: package.as_ptr(),
                parent_name: parent_name.as_ptr(),
                config_name: ptr::null(),
                class_flags: 0,
                cast_flags: 0,
                registration_info: &mut *info,
                properties: properties.as_mut_ptr(),
                property_count: sizes.len() as i32,
                properties_size: 0,
                min_alignment: 0,
                is_registered: 0,
                base_class: ptr::null_mut(),
                outer_register: Some(outer_accessor),
                inner_register: Some(inner_accessor),
            });

            Self {
                _strings: vec![class_name, package, parent_name],
                _properties: properties,
                _info: info,
                descriptor,
            }
        }

        fn ptr(&mut self) -> *mut FfiManagedClassDescriptor {
            &mut *self.descriptor
        }

        fn offsets(&self) -> Vec<i32> {
            unsafe { self.descriptor.properties() }.iter().map(|p| p.offset).collect()
        }
    }

    // Stand-in for the managed accessors of the class under test
    static INNER_CLASS: AtomicPtr<ClassObject> = AtomicPtr::new(ptr::null_mut());

    unsafe extern "C" fn inner_accessor() -> *mut ClassObject {
        INNER_CLASS.load(Ordering::SeqCst)
    }

    unsafe extern "C" fn outer_accessor() -> *mut ClassObject {
        ptr::null_mut()
    }

    fn engine_host() -> (Arc<EngineClassHost>, ClassRef) {
        let host = Arc::new(EngineClassHost::new());
        let object = host
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
        (host, object)
    }

    #[test]
    fn test_register_computes_layout() {
        let (host, object) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let mut fixture = DescriptorFixture::new("Pawn", "Object", &[1, 4, 8]);

        unsafe { bridge.register(fixture.ptr()).unwrap() };

        assert_eq!(fixture.offsets(), vec![40, 44, 48]);
        assert_eq!(fixture.descriptor.properties_size, 56);
        assert_eq!(fixture.descriptor.min_alignment, 8);
        assert_eq!(fixture.descriptor.base_class, object.as_ptr());
        assert!(fixture.descriptor.is_registered());
        assert_eq!(host.registry().pending_count(), 1);
    }

    #[test]
    fn test_register_twice_is_noop() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let mut fixture = DescriptorFixture::new("Pawn", "Object", &[2, 8]);

        unsafe { bridge.register(fixture.ptr()).unwrap() };
        let offsets = fixture.offsets();
        let size = fixture.descriptor.properties_size;

        unsafe { bridge.register(fixture.ptr()).unwrap() };
        assert_eq!(fixture.offsets(), offsets);
        assert_eq!(fixture.descriptor.properties_size, size);
        assert_eq!(host.registry().pending_count(), 1);
    }

    #[test]
    fn test_registered_guard_skips_name_reads() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let mut fixture = DescriptorFixture::new("Pawn", "Object", &[4]);

        unsafe { bridge.register(fixture.ptr()).unwrap() };

        // Names are not read again once registered
        fixture.descriptor.class_name = ptr::null();
        fixture.descriptor.package_name = ptr::null();
        unsafe { bridge.register(fixture.ptr()).unwrap() };
        assert_eq!(host.registry().pending_count(), 1);
    }

    #[test]
    fn test_missing_parent() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host);
        let mut fixture = DescriptorFixture::new("Pawn", "Actor", &[4]);

        let err = unsafe { bridge.register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::ParentClassNotFound { ref parent, .. } if parent == "Actor"));
        assert!(!fixture.descriptor.is_registered());
        assert_eq!(fixture.offsets(), vec![0]);
    }

    #[test]
    fn test_failed_register_leaves_descriptor_unbound() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let roots = host.allocator().root_count();
        let mut fixture = DescriptorFixture::new("Pawn", "Object", &[4, 0]);

        let err = unsafe { bridge.register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPropertySize { size: 0, .. }));
        assert!(!fixture.descriptor.is_registered());
        assert!(fixture.descriptor.base_class.is_null());
        assert_eq!(fixture.offsets(), vec![0, 0]);
        assert_eq!(host.registry().pending_count(), 0);

        // The class cannot be built from a rejected descriptor
        let err = unsafe { bridge.inner_register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized(ref name) if name == "Pawn"));
        let err = unsafe { bridge.outer_register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized(_)));

        assert_eq!(host.find_class("Pawn"), None);
        assert_eq!(host.allocator().root_count(), roots);
    }

    #[test]
    fn test_duplicate_compiled_in_is_not_bound() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let mut first = DescriptorFixture::new("Pawn", "Object", &[4]);
        let mut second = DescriptorFixture::new("Pawn", "Object", &[8]);

        unsafe { bridge.register(first.ptr()).unwrap() };
        let err = unsafe { bridge.register(second.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::Registry(ClassRegistryError::DuplicateCompiledIn { .. })));

        assert!(!second.descriptor.is_registered());
        assert!(second.descriptor.base_class.is_null());
        assert_eq!(second.offsets(), vec![0]);
        assert_eq!(second.descriptor.properties_size, 0);
        assert!(matches!(
            unsafe { bridge.inner_register(second.ptr()) },
            Err(BridgeError::NotInitialized(_))
        ));
        assert_eq!(host.registry().pending_count(), 1);
    }

    #[test]
    fn test_name_taken_by_another_package() {
        let (host, object) = engine_host();
        host.register_native_class(
            ClassObjectParams {
                name: "Actor".into(),
                properties_size: 64,
                min_alignment: 8,
                ..Default::default()
            },
            Some(object),
            "/Script/Engine",
        )
        .unwrap();
        let roots = host.allocator().root_count();
        let allocations = host.allocator().allocation_count();

        let bridge = ClassBridge::new(host.clone());
        let mut fixture = DescriptorFixture::new("Actor", "Object", &[4]);

        let err = unsafe { bridge.register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::Registry(ClassRegistryError::AlreadyRegistered(ref name)) if &**name == "Actor"));
        assert!(!fixture.descriptor.is_registered());
        assert!(fixture.descriptor.base_class.is_null());
        assert_eq!(host.registry().pending_count(), 0);
        assert!(!host.registry().is_compiled_in("/Script/Managed", "Actor"));

        // Nothing left to build on later passes
        assert_eq!(host.process_newly_loaded(), 0);
        assert_eq!(host.allocator().root_count(), roots);
        assert_eq!(host.allocator().allocation_count(), allocations);
    }

    #[test]
    fn test_null_descriptor() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host);

        assert!(matches!(unsafe { bridge.register(ptr::null_mut()) }, Err(BridgeError::NullDescriptor)));
        assert!(matches!(unsafe { bridge.inner_register(ptr::null_mut()) }, Err(BridgeError::NullDescriptor)));
    }

    #[test]
    fn test_singletons_before_registration() {
        let (host, _) = engine_host();
        let bridge = ClassBridge::new(host);
        let mut fixture = DescriptorFixture::new("Pawn", "Object", &[4]);

        let err = unsafe { bridge.inner_register(fixture.ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized(_)));
    }

    #[test]
    fn test_singletons_are_created_once() {
        let (host, object) = engine_host();
        let bridge = ClassBridge::new(host.clone());
        let mut fixture = DescriptorFixture::new("Weapon", "Object", &[4, 4]);

        unsafe { bridge.register(fixture.ptr()).unwrap() };

        let inner = unsafe { bridge.inner_register(fixture.ptr()).unwrap() };
        assert_eq!(unsafe { bridge.inner_register(fixture.ptr()).unwrap() }, inner);
        assert_eq!(host.find_class("Weapon"), Some(inner));

        let class = unsafe { inner.as_ref() };
        assert_eq!(class.properties_size(), 48);
        assert_eq!(class.super_class(), Some(object));
        assert!(class.object_flags().contains(ObjectFlags::MARK_AS_ROOT_SET));
        assert!(unsafe { class.is_child_of(object) });
        assert!(host.allocator().is_root(inner.as_ptr() as *const u8));

        INNER_CLASS.store(inner.as_ptr(), Ordering::SeqCst);
        let outer = unsafe { bridge.outer_register(fixture.ptr()).unwrap() };
        assert_eq!(outer, inner);
        assert_eq!(unsafe { bridge.outer_register(fixture.ptr()).unwrap() }, outer);

        let linked = unsafe { outer.as_ref() };
        assert!(linked.is_linked());
        let offsets: Vec<usize> = linked.properties().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![40, 44]);
    }
}
