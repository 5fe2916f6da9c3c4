//! Instance layout of managed classes
//!
//! Managed classes only declare primitive or pointer-sized fields, so a
//! property's size doubles as its alignment. Fields are appended after the
//! parent's data, each placed at the next multiple of its own size.

use void_core::PropertyInfo;

use crate::error::BridgeError;
use crate::ffi::FfiPropertyDescriptor;

/// Final layout of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    pub properties_size: usize,
    pub min_alignment: usize,
    pub properties: Vec<PropertyInfo>,
}

impl ClassLayout {
    /// Write the computed offsets back into `properties`
    pub fn apply(&self, properties: &mut [FfiPropertyDescriptor]) {
        for (descriptor, info) in properties.iter_mut().zip(&self.properties) {
            descriptor.offset = info.offset as i32;
        }
    }
}

/// Lay out `properties` after a parent of `base_size` bytes aligned to
/// `base_alignment`, writing each computed offset back into its descriptor.
///
/// Nothing is written unless every property can be placed.
pub fn compute_layout(
    base_size: usize,
    base_alignment: usize,
    properties: &mut [FfiPropertyDescriptor],
) -> Result<ClassLayout, BridgeError> {
    let layout = plan_layout(base_size, base_alignment, properties)?;
    layout.apply(properties);
    Ok(layout)
}

/// Compute the layout of `properties` without touching the descriptors
pub fn plan_layout(
    base_size: usize,
    base_alignment: usize,
    properties: &[FfiPropertyDescriptor],
) -> Result<ClassLayout, BridgeError> {
    let mut size = base_size;
    let mut alignment = base_alignment;
    let mut placed = Vec::with_capacity(properties.len());

    for property in properties.iter() {
        let invalid = || BridgeError::InvalidPropertySize {
            property: property.display_name(),
            size: property.size,
        };

        let property_size = usize::try_from(property.size).ok().filter(|s| *s > 0).ok_or_else(invalid)?;

        let offset = size.checked_next_multiple_of(property_size).ok_or_else(invalid)?;
        let end = offset.checked_add(property_size).ok_or_else(invalid)?;
        // Offsets are written back as i32
        i32::try_from(end).map_err(|_| invalid())?;

        placed.push(PropertyInfo {
            name: property.display_name(),
            offset,
            size: property_size,
        });

        size = end;
        alignment = alignment.max(property_size);
    }

    Ok(ClassLayout {
        properties_size: size,
        min_alignment: alignment,
        properties: placed,
    })
}
