//! Introspection rows over the registry.

use crate::point::FailurePoint;
use crate::registry::FailureRegistry;
use serde::Serialize;

/// One registered failure point, as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FailurePointRow<'a> {
    pub name: &'a str,
    pub fail_num: i32,
    pub payload_description: &'a str,
    pub fire_once: bool,
    pub policy_description: &'a str,
}

impl<'a> FailurePointRow<'a> {
    fn from_point(point: &'a FailurePoint) -> Self {
        Self {
            name: point.name(),
            fail_num: point.fail_num(),
            payload_description: point.payload_description(),
            fire_once: point.fire_once(),
            policy_description: point.policy_description(),
        }
    }

    /// `(name, fail_num, payload_description, fire_once, policy_description)`
    pub fn into_tuple(self) -> (&'a str, i32, &'a str, bool, &'a str) {
        (
            self.name,
            self.fail_num,
            self.payload_description,
            self.fire_once,
            self.policy_description,
        )
    }
}

/// Lazy row iterator in registration order.
///
/// Rows borrow from the registry, so no registration can happen while
/// one is alive; enumerating again starts from the first point.
#[derive(Debug, Clone)]
pub struct Rows<'a> {
    inner: std::slice::Iter<'a, FailurePoint>,
}

impl<'a> Iterator for Rows<'a> {
    type Item = FailurePointRow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(FailurePointRow::from_point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Rows<'_> {}

/// Enumerate `registry` as rows.
pub fn rows(registry: &FailureRegistry) -> Rows<'_> {
    Rows {
        inner: registry.iter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Value;
    use crate::registry::FailureRegistryBuilder;

    fn sample() -> FailureRegistry {
        FailureRegistryBuilder::new()
            .always("a", 1, Value::Int8(1234567890123), true)
            .unwrap()
            .probabilistic("b", 2, Value::Text("boom".into()), 0.5, false)
            .unwrap()
            .build()
    }

    #[test]
    fn rows_follow_registration_order() {
        let registry = sample();
        let tuples: Vec<_> = rows(&registry).map(FailurePointRow::into_tuple).collect();
        assert_eq!(
            tuples,
            [
                ("a", 1, "1234567890123", true, "always"),
                ("b", 2, "boom", false, "probabilistic(p=0.5)"),
            ]
        );
    }

    #[test]
    fn enumeration_is_restartable() {
        let registry = sample();
        let first: Vec<_> = rows(&registry).collect();
        let second: Vec<_> = rows(&registry).collect();
        assert_eq!(first, second);
        assert_eq!(rows(&registry).len(), 2);
    }

    #[test]
    fn rows_serialize_as_objects() {
        let registry = sample();
        let json = serde_json::to_value(rows(&registry).next().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "a",
                "fail_num": 1,
                "payload_description": "1234567890123",
                "fire_once": true,
                "policy_description": "always",
            })
        );
    }

    #[test]
    fn empty_registry_has_no_rows() {
        assert_eq!(rows(&FailureRegistry::new()).count(), 0);
    }
}
