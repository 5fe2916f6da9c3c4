//! Runtime version tags for installed .NET hosts
//!
//! Versions are the directory names found under `host/fxr` of a .NET
//! installation: `6.0.3`, `8.0.1.2`, `9.0.0-preview.7.24405.7`.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use crate::error::VersionError;

/// Marker that separates the patch component from a preview number
const PREVIEW_MARKER: &str = "-preview.";

/// Four 8-bit components plus a preview flag
#[derive(Clone, Copy, Default, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub hotfix: u8,
    pub is_preview: bool,
}

impl Version {
    /// Create a release version
    #[inline]
    pub const fn new(major: u8, minor: u8, patch: u8, hotfix: u8) -> Self {
        Self { major, minor, patch, hotfix, is_preview: false }
    }

    /// Create a preview version
    #[inline]
    pub const fn preview(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch, hotfix: 0, is_preview: true }
    }

    /// Version 0.0.0
    pub const ZERO: Version = Version::new(0, 0, 0, 0);

    /// Parse `major.minor.patch[.hotfix]` or `major.minor.patch-preview.N`.
    ///
    /// Components are read like C `atoi`: leading digits only, anything else
    /// reads as zero. Returns `None` when the major/minor/patch split fails.
    /// The preview number is not retained, only the flag.
    pub fn try_parse(input: &str) -> Option<Self> {
        let (major, rest) = input.split_once('.')?;
        let (minor, mut patch) = rest.split_once('.')?;

        let mut is_preview = false;
        if let Some((before, _preview_number)) = patch.split_once(PREVIEW_MARKER) {
            patch = before;
            is_preview = true;
        }

        let (patch, hotfix) = match patch.split_once('.') {
            Some((patch, hotfix)) => (patch, leading_number(hotfix)),
            None => (patch, 0),
        };

        Some(Self {
            major: leading_number(major),
            minor: leading_number(minor),
            patch: leading_number(patch),
            hotfix,
            is_preview,
        })
    }

    /// Packed numeric value, major in the most significant byte
    #[inline]
    pub const fn packed(&self) -> u32 {
        (self.major as u32) << 24 | (self.minor as u32) << 16 | (self.patch as u32) << 8 | self.hotfix as u32
    }

    /// Inequality exactly as the managed-side contract defines it.
    ///
    /// The contract spells `!=` with the same body as `==`, so this returns
    /// `true` when the versions are *equal*. Kept under its own name until the
    /// owners of the contract confirm the intent; `!=` on `Version` is the
    /// ordinary negation of `==`.
    #[inline]
    pub fn contract_ne(&self, other: &Version) -> bool {
        self == other
    }
}

/// C `atoi` over the leading ASCII digits, truncated to 8 bits
fn leading_number(text: &str) -> u8 {
    let value = text
        .trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, digit| acc.wrapping_mul(10).wrapping_add((digit - b'0') as u32));
    value as u8
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.packed() == other.packed() && self.is_preview == other.is_preview
    }
}

impl PartialOrd for Version {
    /// Ordered by packed value. Versions with the same numbers but a different
    /// preview flag are neither equal nor ordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.packed().cmp(&other.packed()) {
            Ordering::Equal if self.is_preview != other.is_preview => None,
            ordering => Some(ordering),
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| VersionError::Malformed(s.into()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hotfix != 0 {
            write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.hotfix)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_preview {
            write!(f, "Version({}-preview)", self)
        } else {
            write!(f, "Version({})", self)
        }
    }
}
