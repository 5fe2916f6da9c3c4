//! Host class system boundary
//!
//! [`ClassHost`] is everything the registration bridge needs from the
//! engine's reflection system. [`EngineClassHost`] implements it over the
//! class registry and object allocator.

use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard};
use void_core::{ClassAccessorFn, ClassObject, ClassObjectParams, ClassRef, ClassRegistry, CompiledInClass, PropertyInfo};
use void_memory::ObjectAllocator;

use crate::error::BridgeError;

/// Inputs of the "construct class from params" path
#[derive(Debug, Clone)]
pub struct ClassConstructionParams {
    pub class_name: String,
    /// Returns the class object to link
    pub inner_register: ClassAccessorFn,
    pub properties: Vec<PropertyInfo>,
}

/// The engine's class system, as seen by the registration bridge
pub trait ClassHost: Send + Sync {
    /// Find a class by name in any package
    fn find_class(&self, name: &str) -> Option<ClassRef>;

    /// Allocate a root-set class object and construct it in place
    fn allocate_class(&self, params: ClassObjectParams) -> Result<ClassRef, BridgeError>;

    /// Bind a freshly allocated class to its parent, outer class and package
    fn initialize_private_static_class(
        &self,
        super_class: Option<ClassRef>,
        class: ClassRef,
        within: Option<ClassRef>,
        package: &str,
        name: &str,
    ) -> Result<(), BridgeError>;

    /// Fetch the class through its inner accessor and link its properties
    fn construct_class_from_params(&self, params: ClassConstructionParams) -> Result<ClassRef, BridgeError>;

    /// Queue a class for processing once loading finishes
    fn register_compiled_in(&self, class: CompiledInClass) -> Result<(), BridgeError>;

    /// Construct every class queued since the last call, returning how many were built
    fn process_newly_loaded(&self) -> usize;
}

/// Class host backed by [`ClassRegistry`] and [`ObjectAllocator`]
pub struct EngineClassHost {
    registry: RwLock<ClassRegistry>,
    allocator: ObjectAllocator,
}

impl EngineClassHost {
    pub fn new() -> Self {
        Self::with_allocator(ObjectAllocator::new())
    }

    pub fn with_allocator(allocator: ObjectAllocator) -> Self {
        Self {
            registry: RwLock::new(ClassRegistry::new()),
            allocator,
        }
    }

    /// Create and publish a class implemented by the engine itself
    pub fn register_native_class(
        &self,
        params: ClassObjectParams,
        super_class: Option<ClassRef>,
        package: &str,
    ) -> Result<ClassRef, BridgeError> {
        let name = params.name.clone();
        let within = super_class.and_then(|parent| unsafe { parent.as_ref() }.within());

        let class = self.allocate_class(params)?;
        self.initialize_private_static_class(super_class, class, within, package, &name)?;

        log::debug!(target: "dotnet", "Registered native class {}.{}", package, name);
        Ok(class)
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, ClassRegistry> {
        self.registry.read()
    }

    pub fn allocator(&self) -> &ObjectAllocator {
        &self.allocator
    }
}

impl ClassHost for EngineClassHost {
    fn find_class(&self, name: &str) -> Option<ClassRef> {
        self.registry.read().find(name)
    }

    fn allocate_class(&self, params: ClassObjectParams) -> Result<ClassRef, BridgeError> {
        let name = params.name.clone();
        self.allocator
            .emplace(ClassObject::new(params), true)
            .map(ClassRef::from_non_null)
            .ok_or(BridgeError::AllocationFailed(name))
    }

    fn initialize_private_static_class(
        &self,
        super_class: Option<ClassRef>,
        class: ClassRef,
        within: Option<ClassRef>,
        package: &str,
        name: &str,
    ) -> Result<(), BridgeError> {
        let published = self.registry.write().add(name, class);
        if let Err(e) = published {
            // The class was never published, so nothing else can hold it
            unsafe { self.allocator.release(class.as_ptr() as *mut u8) };
            return Err(e.into());
        }

        unsafe { class.as_mut() }.initialize_static(super_class, within, package);
        Ok(())
    }

    fn construct_class_from_params(&self, params: ClassConstructionParams) -> Result<ClassRef, BridgeError> {
        let class = unsafe { (params.inner_register)() };
        let class = ClassRef::from_raw(class).ok_or_else(|| BridgeError::NullClass(params.class_name.clone()))?;

        let class_object = unsafe { class.as_mut() };
        if !class_object.is_linked() {
            class_object.link_properties(params.properties);
        }
        Ok(class)
    }

    fn register_compiled_in(&self, class: CompiledInClass) -> Result<(), BridgeError> {
        self.registry.write().register_compiled_in(class)?;
        Ok(())
    }

    fn process_newly_loaded(&self) -> usize {
        // Accessors call back into the host, so the lock must not be held
        let pending = self.registry.write().take_pending();
        let mut constructed = 0;

        for entry in pending {
            let class = unsafe { (entry.outer_register)() };
            if class.is_null() {
                log::error!(target: "dotnet", "Failed to construct class {}.{}", entry.package, entry.name);
                continue;
            }

            log::debug!(target: "dotnet", "Constructed class {}.{}", entry.package, entry.name);
            constructed += 1;
        }

        constructed
    }
}

impl Default for EngineClassHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineClassHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClassHost")
            .field("registry", &*self.registry.read())
            .field("allocator", &self.allocator)
            .finish()
    }
}
