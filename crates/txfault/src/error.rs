//! Error taxonomy for registration, encoding, and lifecycle transitions.

use crate::injector::InjectorError;
use thiserror::Error;

/// Errors surfaced by the registry and the lifecycle controller.
///
/// Encoding and registration errors are returned to the registering
/// caller with no state change.  Errors raised while installing or
/// uninstalling are returned to the host hook that triggered the
/// transition, which is expected to abort the host operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultError {
    #[error("failinfo of type {type_name} is not supported")]
    UnsupportedPayloadType { type_name: String },

    #[error("invalid {type_name} literal: {literal:?}")]
    InvalidLiteral { type_name: String, literal: String },

    #[error("cannot add failure points while points installed")]
    RegistrationWhileInstalled,

    #[error("external predicate {symbol:?} for failure point {point:?} is not bound")]
    UnresolvedExternalPredicate { point: String, symbol: String },

    #[error("permission denied to set {setting}")]
    PermissionDenied { setting: &'static str },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("fault injector rejected {point:?}: {source}")]
    Injector {
        point: String,
        #[source]
        source: InjectorError,
    },
}

pub type Result<T> = std::result::Result<T, FaultError>;
