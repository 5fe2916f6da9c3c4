//! # void_core - Void Engine Core
//!
//! Zero-dependency primitives shared by the .NET hosting bridge:
//! - **Versions**: runtime version tags as found in a .NET installation
//! - **Class system**: native class objects and the global class registry
//!   that compiled-in registrations are queued into

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod class_registry;
pub mod error;
pub mod version;

pub use class_registry::*;
pub use error::*;
pub use version::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::class_registry::{
        ClassAccessorFn, ClassFlags, ClassObject, ClassObjectParams, ClassRef, ClassRegistry, ClassVTable,
        CompiledInClass, ObjectFlags, PropertyInfo,
    };
    pub use crate::error::{ClassRegistryError, VersionError};
    pub use crate::version::Version;
}
