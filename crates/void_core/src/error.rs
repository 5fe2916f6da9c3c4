//! Error types for the core library
//!
//! Each component reports its own error; the dependent crates wrap them.

use core::fmt;
use alloc::boxed::Box;

/// Version parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Input has no `major.minor.patch` shape
    Malformed(Box<str>),
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::Malformed(input) => write!(f, "Malformed version string: '{}'", input),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VersionError {}

/// Class registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRegistryError {
    /// A class with this name is already in the namespace
    AlreadyRegistered(Box<str>),
    /// A compiled-in registration for this package/class pair already exists
    DuplicateCompiledIn { package: Box<str>, class: Box<str> },
}

impl fmt::Display for ClassRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassRegistryError::AlreadyRegistered(name) => write!(f, "Class already registered: {}", name),
            ClassRegistryError::DuplicateCompiledIn { package, class } => {
                write!(f, "Compiled-in class already registered: {}.{}", package, class)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ClassRegistryError {}
