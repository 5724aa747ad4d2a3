//! Runtime type markers for dynamically typed pipelines.

use std::any::{type_name, Any};
use std::fmt;

/// A context whose concrete type changes from step to step.
pub type DynValue = Box<dyn Any + Send>;

/// A runtime check that a context value has an expected type.
///
/// Typed pipelines attach a marker to each step so that a jump, which can
/// land outside the statically checked forward path, is verified before the
/// target runs.
pub struct TypeMarker<C> {
    type_name: &'static str,
    check: fn(&C) -> bool,
}

impl<C> TypeMarker<C> {
    /// Creates a marker from a name and a predicate.
    #[must_use]
    pub const fn new(type_name: &'static str, check: fn(&C) -> bool) -> Self {
        Self { type_name, check }
    }

    /// Returns the name of the expected type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if `value` satisfies the marker.
    #[must_use]
    pub fn matches(&self, value: &C) -> bool {
        (self.check)(value)
    }
}

impl TypeMarker<DynValue> {
    /// Marker for a boxed value of type `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self::new(type_name::<T>(), |value| (**value).is::<T>())
    }
}

impl<C> Clone for TypeMarker<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for TypeMarker<C> {}

impl<C> fmt::Debug for TypeMarker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeMarker").field(&self.type_name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_checks_boxed_type() {
        let marker = TypeMarker::<DynValue>::of::<String>();
        let text: DynValue = Box::new("hi".to_string());
        let number: DynValue = Box::new(3_u32);

        assert!(marker.matches(&text));
        assert!(!marker.matches(&number));
        assert!(marker.type_name().contains("String"));
    }

    #[test]
    fn test_custom_marker() {
        let even = TypeMarker::new("even", |n: &i32| n % 2 == 0);
        assert!(even.matches(&4));
        assert!(!even.matches(&3));
    }
}
