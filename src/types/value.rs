//! Dynamically typed result payloads.
//!
//! Deferred values carry "any value" by design, so results are stored behind
//! a reference-counted [`Value`]. Cloning is cheap; every child of a shared
//! node sees the same payload. Payloads produced on adapter threads cross
//! into the loop as `Box<dyn Any + Send>` and are converted on arrival.

use core::any::Any;
use core::fmt;
use std::rc::Rc;

/// A dynamically typed, reference-counted result payload.
#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    /// Wraps a concrete value.
    #[must_use]
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// The unit payload, used by sources that fulfil with no data.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Converts a payload that crossed a thread boundary.
    #[must_use]
    pub fn from_sendable(boxed: Box<dyn Any + Send>) -> Self {
        let boxed: Box<dyn Any> = boxed;
        Self(Rc::from(boxed))
    }

    /// Borrows the payload as a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Clones the payload out as a concrete type.
    #[must_use]
    pub fn extract<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Returns true if the payload is of type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(type_id: {:?})", self.0.as_ref().type_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_concrete_types() {
        let v = Value::new(42_i32);
        assert_eq!(v.downcast_ref::<i32>(), Some(&42));
        assert_eq!(v.extract::<i32>(), Some(42));
        assert!(v.downcast_ref::<String>().is_none());
    }

    #[test]
    fn clones_share_payload() {
        let v = Value::new(String::from("shared"));
        let w = v.clone();
        assert_eq!(v.downcast_ref::<String>(), w.downcast_ref::<String>());
    }

    #[test]
    fn from_sendable_preserves_type() {
        let boxed: Box<dyn core::any::Any + Send> = Box::new(7_u64);
        let v = Value::from_sendable(boxed);
        assert_eq!(v.extract::<u64>(), Some(7));
    }

    #[test]
    fn unit_is_unit() {
        assert!(Value::unit().is::<()>());
    }
}
