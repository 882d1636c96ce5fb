//! Failure point registry — the ordered set of points to install.
//!
//! A [`FailureRegistry`] keeps points in registration order.  It only
//! ever grows; whether growth is currently allowed is decided by the
//! [`Controller`](super::controller::Controller) that owns it.

use crate::error::Result;
use crate::payload::Value;
use crate::point::{FailurePoint, Policy};

/// An ordered, append-only collection of failure points.
///
/// Names need not be unique: duplicates are kept side by side and all
/// of them are installed, in order.
#[derive(Debug, Clone, Default)]
pub struct FailureRegistry {
    points: Vec<FailurePoint>,
}

impl FailureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Append a point after all existing ones.
    pub fn push(&mut self, point: FailurePoint) {
        self.points.push(point);
    }

    /// Points in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, FailurePoint> {
        self.points.iter()
    }

    pub fn get(&self, index: usize) -> Option<&FailurePoint> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of registered points carrying `name`.
    pub fn count_named(&self, name: &str) -> usize {
        self.points.iter().filter(|p| p.name() == name).count()
    }
}

impl<'a> IntoIterator for &'a FailureRegistry {
    type Item = &'a FailurePoint;
    type IntoIter = std::slice::Iter<'a, FailurePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Builder for declaring a registry up front.
///
/// # Example
///
/// ```
/// use txfault::payload::Value;
/// use txfault::registry::FailureRegistryBuilder;
///
/// let registry = FailureRegistryBuilder::new()
///     .always("posix/io/rw/write", 28, Value::Text("ENOSPC".into()), false)?
///     .probabilistic("posix/mm/malloc", 12, Value::Null, 0.01, false)?
///     .stack_conditioned("posix/io/sync/fsync", 5, Value::Null, "XLogFlush", true)?
///     .build();
///
/// assert_eq!(registry.len(), 3);
/// # Ok::<(), txfault::error::FaultError>(())
/// ```
pub struct FailureRegistryBuilder {
    registry: FailureRegistry,
}

impl FailureRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: FailureRegistry::new(),
        }
    }

    /// Declare a point that fails every time.
    pub fn always(
        self,
        name: &str,
        fail_num: i32,
        value: Value,
        fire_once: bool,
    ) -> Result<Self> {
        self.with(name, fail_num, value, fire_once, Policy::Always)
    }

    /// Declare a point that fails with `probability`.
    pub fn probabilistic(
        self,
        name: &str,
        fail_num: i32,
        value: Value,
        probability: f32,
        fire_once: bool,
    ) -> Result<Self> {
        self.with(
            name,
            fail_num,
            value,
            fire_once,
            Policy::Probabilistic { probability },
        )
    }

    /// Declare a point driven by a named external predicate.
    pub fn external(
        self,
        name: &str,
        fail_num: i32,
        value: Value,
        symbol: &str,
        fire_once: bool,
    ) -> Result<Self> {
        self.with(
            name,
            fail_num,
            value,
            fire_once,
            Policy::ExternalPredicate {
                symbol: symbol.to_string(),
            },
        )
    }

    /// Declare a point that fails while `function` is on the call stack.
    pub fn stack_conditioned(
        self,
        name: &str,
        fail_num: i32,
        value: Value,
        function: &str,
        fire_once: bool,
    ) -> Result<Self> {
        self.with(
            name,
            fail_num,
            value,
            fire_once,
            Policy::StackConditioned {
                function: function.to_string(),
            },
        )
    }

    /// Build the final registry.
    pub fn build(self) -> FailureRegistry {
        self.registry
    }

    fn with(
        mut self,
        name: &str,
        fail_num: i32,
        value: Value,
        fire_once: bool,
        policy: Policy,
    ) -> Result<Self> {
        let point = FailurePoint::new(name, fail_num, &value, fire_once, policy)?;
        self.registry.push(point);
        Ok(self)
    }
}

impl Default for FailureRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
