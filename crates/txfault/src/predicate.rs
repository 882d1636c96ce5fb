//! Named external predicates.
//!
//! Failure points with an external policy refer to their predicate by
//! name.  The host binds names to callables in a [`PredicateTable`];
//! the dispatcher resolves them when points are installed, so a
//! predicate may be bound after the point that uses it is registered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Decides whether an externally-predicated point fails.
///
/// Receives the point name and its fail number, which the predicate
/// may rewrite before the failure is reported.
pub type ExternalPredicate = Arc<dyn Fn(&str, &mut i32) -> bool + Send + Sync>;

/// Mapping from predicate symbol to callable.
#[derive(Clone, Default)]
pub struct PredicateTable {
    entries: BTreeMap<String, ExternalPredicate>,
}

impl PredicateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `symbol`, returning the predicate it previously resolved to.
    pub fn bind<F>(&mut self, symbol: impl Into<String>, predicate: F) -> Option<ExternalPredicate>
    where
        F: Fn(&str, &mut i32) -> bool + Send + Sync + 'static,
    {
        self.entries.insert(symbol.into(), Arc::new(predicate))
    }

    /// Remove a binding.  Returns whether one existed.
    pub fn unbind(&mut self, symbol: &str) -> bool {
        self.entries.remove(symbol).is_some()
    }

    pub fn resolve(&self, symbol: &str) -> Option<ExternalPredicate> {
        self.entries.get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Bound symbols in lexicographic order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PredicateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
