//! Access flags and the class status lattice.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Class-level access and shape flags
    pub struct ClassFlags: u32 {
        /// Class is visible outside its package
        const PUBLIC = 0x0001;
        /// Class cannot be subclassed
        const FINAL = 0x0010;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// Class cannot be instantiated
        const ABSTRACT = 0x0400;
        /// Class is an array type
        const ARRAY = 0x1_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field and method access flags
    pub struct MemberFlags: u32 {
        /// Member is accessible from everywhere
        const PUBLIC = 0x0001;
        /// Member is accessible from the declaring class only
        const PRIVATE = 0x0002;
        /// Member is accessible from subclasses and the package
        const PROTECTED = 0x0004;
        /// Member belongs to the class, not an instance
        const STATIC = 0x0008;
        /// Field cannot be reassigned, method cannot be overridden
        const FINAL = 0x0010;
        /// Field accesses need acquire/release ordering
        const VOLATILE = 0x0040;
        /// Method is implemented outside the bytecode
        const NATIVE = 0x0100;
        /// Method has no implementation
        const ABSTRACT = 0x0400;
        /// Method is an instance or class constructor
        const CONSTRUCTOR = 0x1_0000;
    }
}

impl ClassFlags {
    /// Returns true if instances of the class can be allocated directly.
    #[must_use]
    pub fn is_instantiable(self) -> bool {
        (!self.intersects(Self::ABSTRACT | Self::INTERFACE)) || self.contains(Self::ARRAY)
    }
}

/// Compilation status of a class, mirroring the runtime's initialization lattice.
///
/// Statuses only move upward: `NotReady < Verified < Initializing < Initialized`. `Error` is
/// terminal and absorbs every later update.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(u8)]
pub enum ClassStatus {
    /// Loaded, nothing proven yet
    #[default]
    NotReady = 0,
    /// Passed verification
    Verified = 1,
    /// Static initializer is running
    Initializing = 2,
    /// Static initializer completed
    Initialized = 3,
    /// Verification or initialization failed
    Error = 4,
}

impl ClassStatus {
    /// Reconstructs a status from its raw representation.
    ///
    /// Unknown values map to [`ClassStatus::Error`].
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::NotReady,
            1 => Self::Verified,
            2 => Self::Initializing,
            3 => Self::Initialized,
            _ => Self::Error,
        }
    }

    /// Combines the current status with a newly observed one.
    ///
    /// Returns the higher of the two; `Error` wins over everything.
    #[must_use]
    pub fn merge(self, other: ClassStatus) -> ClassStatus {
        if self == Self::Error || other == Self::Error {
            Self::Error
        } else {
            self.max(other)
        }
    }

    /// Returns true if the class passed verification.
    #[must_use]
    pub fn is_verified(self) -> bool {
        matches!(self, Self::Verified | Self::Initializing | Self::Initialized)
    }
}

impl fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotReady => "not ready",
            Self::Verified => "verified",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_merge_is_monotonic() {
        assert_eq!(
            ClassStatus::NotReady.merge(ClassStatus::Verified),
            ClassStatus::Verified
        );
        assert_eq!(
            ClassStatus::Initialized.merge(ClassStatus::Verified),
            ClassStatus::Initialized
        );
        assert_eq!(
            ClassStatus::Verified.merge(ClassStatus::Verified),
            ClassStatus::Verified
        );
    }

    #[test]
    fn test_status_error_is_terminal() {
        assert_eq!(
            ClassStatus::Verified.merge(ClassStatus::Error),
            ClassStatus::Error
        );
        assert_eq!(
            ClassStatus::Error.merge(ClassStatus::Initialized),
            ClassStatus::Error
        );
    }

    #[test]
    fn test_status_raw_roundtrip() {
        for status in [
            ClassStatus::NotReady,
            ClassStatus::Verified,
            ClassStatus::Initializing,
            ClassStatus::Initialized,
            ClassStatus::Error,
        ] {
            assert_eq!(ClassStatus::from_raw(status as u8), status);
        }
        assert_eq!(ClassStatus::from_raw(200), ClassStatus::Error);
    }

    #[test]
    fn test_instantiable() {
        assert!(ClassFlags::PUBLIC.is_instantiable());
        assert!(!(ClassFlags::PUBLIC | ClassFlags::ABSTRACT).is_instantiable());
        assert!(!ClassFlags::INTERFACE.is_instantiable());
        assert!((ClassFlags::ABSTRACT | ClassFlags::ARRAY).is_instantiable());
    }
}
