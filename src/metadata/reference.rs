//! Value identities for modules, classes, methods and the indices found inside method bodies.
//!
//! Every shared table in the driver is keyed by one of these types. They are small `Copy`
//! values, totally ordered (so snapshots can be sorted deterministically) and hashable.
//!
//! # Examples
//!
//! ```rust
//! use aotscope::metadata::reference::{ClassReference, MethodReference, ModuleId};
//!
//! let module = ModuleId::new(2);
//! let class = ClassReference::new(module, 7);
//! let method = MethodReference::new(module, 41);
//!
//! assert_eq!(class.to_string(), "m2:c7");
//! assert_eq!(method.to_string(), "m2:m41");
//! assert!(method < MethodReference::new(ModuleId::new(3), 0));
//! ```

use std::fmt;

use strum::{EnumCount, EnumIter};

/// Opaque identity of a loaded bytecode module.
///
/// Handed out by the [`TypeSystem`](crate::TypeSystem) and stable for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Creates a module identity from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        ModuleId(value)
    }

    /// Returns the raw value of this identity.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A class definition inside a module: `(module, class_def_index)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClassReference {
    /// The module that defines the class
    pub module: ModuleId,
    /// Index of the class definition within its module
    pub class_def_index: u32,
}

impl ClassReference {
    /// Creates a new class reference.
    #[must_use]
    pub fn new(module: ModuleId, class_def_index: u32) -> Self {
        ClassReference {
            module,
            class_def_index,
        }
    }
}

impl fmt::Display for ClassReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:c{}", self.module, self.class_def_index)
    }
}

/// A method inside a module: `(module, method_index)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MethodReference {
    /// The module that defines the method
    pub module: ModuleId,
    /// Index of the method within its module
    pub method_index: u32,
}

impl MethodReference {
    /// Creates a new method reference.
    #[must_use]
    pub fn new(module: ModuleId, method_index: u32) -> Self {
        MethodReference {
            module,
            method_index,
        }
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:m{}", self.module, self.method_index)
    }
}

/// Index of a type reference, relative to the module whose code uses it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeIndex(pub u32);

/// Index of a field reference, relative to the module whose code uses it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FieldIndex(pub u32);

/// Index of a string constant, relative to the module whose code uses it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StringIndex(pub u32);

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for FieldIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl fmt::Display for StringIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The dispatch kind of a call site, or of a method itself.
///
/// Fast-path invoke decisions may sharpen a `Virtual` or `Super` call into a `Direct` one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, EnumCount, EnumIter)]
pub enum InvokeKind {
    /// Static method call, no receiver
    Static,
    /// Non-virtual instance call (constructors, private methods)
    Direct,
    /// Virtual dispatch through the receiver's vtable
    Virtual,
    /// Dispatch through the superclass vtable
    Super,
    /// Interface dispatch
    Interface,
}

impl InvokeKind {
    /// Position of this kind in per-kind statistics arrays.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns true if the call goes through a dispatch table.
    #[must_use]
    pub fn is_dispatched(self) -> bool {
        matches!(self, Self::Virtual | Self::Super | Self::Interface)
    }
}

impl fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::Direct => "direct",
            Self::Virtual => "virtual",
            Self::Super => "super",
            Self::Interface => "interface",
        };
        f.write_str(name)
    }
}
