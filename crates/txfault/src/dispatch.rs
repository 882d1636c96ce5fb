//! Policy dispatch — one injector call per failure point.

use crate::error::{FaultError, Result};
use crate::injector::{Activation, FaultInjector, InjectorError};
use crate::point::{FailurePoint, Policy, ANY_STACK_POS};
use crate::predicate::PredicateTable;
use log::{debug, warn};

/// Enable `point` in `injector` using the call its policy requires.
///
/// External predicates are resolved here, at install time.  An unbound
/// symbol is passed on as a missing callback; if the injector rejects
/// that, the error becomes [`FaultError::UnresolvedExternalPredicate`].
pub fn activate<I: FaultInjector + ?Sized>(
    injector: &mut I,
    predicates: &PredicateTable,
    point: &FailurePoint,
) -> Result<()> {
    let activation = Activation {
        name: point.name(),
        fail_num: point.fail_num(),
        fail_info: point.payload(),
        one_shot: point.fire_once(),
    };
    debug!("Activating {point}");

    let result = match point.policy() {
        Policy::Always => injector.enable(activation),
        Policy::Probabilistic { probability } => injector.enable_random(activation, *probability),
        Policy::ExternalPredicate { symbol } => {
            let predicate = predicates.resolve(symbol);
            if predicate.is_none() {
                warn!(
                    "External predicate {symbol:?} for {} is not bound",
                    point.name()
                );
            }
            return injector
                .enable_external(activation, predicate)
                .map_err(|err| match err {
                    InjectorError::MissingCallback => FaultError::UnresolvedExternalPredicate {
                        point: point.name().to_string(),
                        symbol: symbol.clone(),
                    },
                    other => injector_error(point, other),
                });
        }
        Policy::StackConditioned { function } => {
            injector.enable_stack_by_name(activation, function, ANY_STACK_POS)
        }
    };
    result.map_err(|err| injector_error(point, err))
}

/// Disable `point` by name, whatever policy enabled it.
pub fn deactivate<I: FaultInjector + ?Sized>(injector: &mut I, point: &FailurePoint) -> Result<()> {
    debug!("Deactivating {}", point.name());
    injector
        .disable(point.name())
        .map_err(|err| injector_error(point, err))
}

fn injector_error(point: &FailurePoint, source: InjectorError) -> FaultError {
    FaultError::Injector {
        point: point.name().to_string(),
        source,
    }
}
