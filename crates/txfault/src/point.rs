//! Failure point definitions.
//!
//! A [`FailurePoint`] names an injection site in the host, the fail
//! number reported when it triggers, optional failinfo, and the
//! [`Policy`] that decides when an installed point actually fails.
//! Points are immutable once built.

use crate::error::Result;
use crate::payload::{encode, Payload, Value};
use std::fmt;

/// Stack position wildcard: the function may appear at any depth.
pub const ANY_STACK_POS: i32 = -1;

/// When an installed failure point triggers.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    /// Every evaluation fails.
    Always,

    /// Fails with the given probability.
    ///
    /// Stored verbatim; values outside `[0, 1]` are left to the
    /// injector's interpretation.
    Probabilistic {
        probability: f32,
    },

    /// Fails when a named predicate, bound at install time, says so.
    ExternalPredicate {
        symbol: String,
    },

    /// Fails when the named function is on the current call stack.
    StackConditioned {
        function: String,
    },
}

impl Policy {
    /// Broad classification of this policy.
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::Always => PolicyKind::Always,
            Policy::Probabilistic { .. } => PolicyKind::Probabilistic,
            Policy::ExternalPredicate { .. } => PolicyKind::External,
            Policy::StackConditioned { .. } => PolicyKind::Stack,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Always => write!(f, "always"),
            Policy::Probabilistic { probability } => {
                write!(f, "probabilistic(p={probability})")
            }
            Policy::ExternalPredicate { symbol } => write!(f, "external({symbol})"),
            Policy::StackConditioned { function } => {
                write!(f, "stack({function}, pos=any)")
            }
        }
    }
}

/// Tag-only view of [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Always,
    Probabilistic,
    External,
    Stack,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Always => write!(f, "always"),
            PolicyKind::Probabilistic => write!(f, "probabilistic"),
            PolicyKind::External => write!(f, "external"),
            PolicyKind::Stack => write!(f, "stack"),
        }
    }
}

/// A declared fault-injection rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FailurePoint {
    name: String,
    fail_num: i32,
    payload: Option<Payload>,
    payload_description: String,
    fire_once: bool,
    policy: Policy,
    policy_description: String,
}

impl FailurePoint {
    /// Build a point, encoding `value` into its payload.
    ///
    /// Nothing is built if the value cannot be encoded.
    pub fn new(
        name: impl Into<String>,
        fail_num: i32,
        value: &Value,
        fire_once: bool,
        policy: Policy,
    ) -> Result<Self> {
        let encoded = encode(value)?;
        let policy_description = policy.to_string();
        Ok(Self {
            name: name.into(),
            fail_num,
            payload: encoded.payload,
            payload_description: encoded.description,
            fire_once,
            policy,
            policy_description,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fail number reported to the call site when the point triggers.
    pub fn fail_num(&self) -> i32 {
        self.fail_num
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_description(&self) -> &str {
        &self.payload_description
    }

    /// Whether the point disables itself after firing once.
    pub fn fire_once(&self) -> bool {
        self.fire_once
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn policy_description(&self) -> &str {
        &self.policy_description
    }
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(fail={}, info={}, {}{})",
            self.name,
            self.fail_num,
            self.payload_description,
            self.policy_description,
            if self.fire_once { ", once" } else { "" }
        )
    }
}
