//! Type and method resolution
//!
//! The frame codec never assumes a global reflection registry. Decoding
//! resolves method identities through an injected, class-loader-scoped
//! oracle: a `MethodResolver` owned by whoever loaded the classes the
//! stream refers to.

use crate::frames::{Method, MethodSignature, Slot};

/// Class-loader-scoped symbol table used during frame decoding.
pub trait MethodResolver: Send + Sync {
    /// Resolve a method by scanning the holder's declared methods for one
    /// whose name, parameter types, and return type all match. `None`
    /// surfaces as a `NoSuchMethod` error naming the offending frame.
    fn resolve(&self, holder: &str, name: &str, signature: &MethodSignature) -> Option<Method>;

    /// Name the class of a receiver value. Used to recover the holder of
    /// a frame encoded with the derive-holder-from-receiver flag.
    fn class_of(&self, receiver: &Slot) -> Option<String>;
}
