//! Lifecycle controller — the central orchestrator.
//!
//! The [`Controller`] owns the failure registry, the predicate table,
//! and the fault injector.  The host calls into it from its lifecycle
//! hooks (see [`hooks`](crate::hooks)); clients register points and arm
//! it between transactions.
//!
//! # States
//!
//! ```text
//!            arm()                 pre-parse / pre-execute / utility
//!   Idle ───────────────→ Armed ─────────────────────────────────→ Active
//!    ↑                                                                │
//!    └──────────────────────── commit / abort ────────────────────────┘
//! ```
//!
//! Installation happens at most once per arming.  Points are only
//! active between the first qualifying hook of a transaction and the
//! end of that transaction.

use crate::dispatch;
use crate::error::{FaultError, Result};
use crate::hooks::LifecycleObserver;
use crate::injector::{FaultInjector, InMemoryInjector};
use crate::payload::Value;
use crate::point::{FailurePoint, Policy};
use crate::predicate::PredicateTable;
use crate::registry::FailureRegistry;
use crate::view::{self, Rows};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the setting that arms the controller for the next transaction.
pub const INJECT_NEXT_XACT: &str = "txfault.inject_next_xact";

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seed for the in-memory injector's RNG.
    pub seed: u64,
    /// Initial value of [`INJECT_NEXT_XACT`]; `true` starts armed.
    pub inject_next_xact: bool,
    /// Whether assigning [`INJECT_NEXT_XACT`] requires superuser.
    pub toggle_superuser_only: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            inject_next_xact: false,
            toggle_superuser_only: true,
        }
    }
}

/// Privilege of the session assigning a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Superuser,
    Ordinary,
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    /// Nothing armed, nothing installed.
    Idle,
    /// Installation pending at the next qualifying hook.
    Armed,
    /// Points installed for the current transaction.
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Armed => write!(f, "armed"),
            LifecycleState::Active => write!(f, "active"),
        }
    }
}

/// The transaction-scoped fault-injection controller.
///
/// A controller is meant to be driven from a single session: every
/// mutating entry point takes `&mut self`.  Hosts with concurrent
/// sessions either keep one controller per session or put a shared one
/// behind a single mutex.
///
/// # Example
///
/// ```
/// use txfault::controller::{Controller, ControllerConfig};
/// use txfault::hooks::XactEvent;
/// use txfault::payload::Value;
///
/// let mut controller = Controller::new(ControllerConfig::default());
/// controller.register_always("posix/io/rw/write", 28, &Value::Null, false)?;
/// controller.arm();
///
/// controller.on_pre_parse()?;
/// assert!(controller.is_installed());
/// assert!(controller.injector_mut().fail("posix/io/rw/write", &[]).is_some());
///
/// controller.on_xact_event(XactEvent::Commit)?;
/// assert!(!controller.is_installed());
/// assert!(controller.injector_mut().fail("posix/io/rw/write", &[]).is_none());
/// # Ok::<(), txfault::error::FaultError>(())
/// ```
pub struct Controller<I: FaultInjector = InMemoryInjector> {
    config: ControllerConfig,
    registry: FailureRegistry,
    predicates: PredicateTable,
    injector: I,
    pub(crate) observers: Vec<Box<dyn LifecycleObserver>>,
    /// Install at the next qualifying hook.
    armed: bool,
    /// Points are enabled in the injector.
    installed: bool,
    /// Completed installations.
    installs: u64,
}

impl Controller<InMemoryInjector> {
    /// Create a controller backed by an [`InMemoryInjector`].
    pub fn new(config: ControllerConfig) -> Self {
        let injector = InMemoryInjector::with_seed(config.seed);
        ControllerBuilder::new(config, injector).build()
    }
}

impl<I: FaultInjector> Controller<I> {
    // ── Registration ────────────────────────────────────────────

    /// Append an already-built point.
    pub fn register(&mut self, point: FailurePoint) -> Result<()> {
        if self.installed {
            warn!("Rejecting {}: failure points are installed", point.name());
            return Err(FaultError::RegistrationWhileInstalled);
        }
        debug!("Registered {point}");
        self.registry.push(point);
        Ok(())
    }

    /// Register a point that fails every time it is evaluated.
    pub fn register_always(
        &mut self,
        name: &str,
        fail_num: i32,
        value: &Value,
        fire_once: bool,
    ) -> Result<()> {
        self.build_and_register(name, fail_num, value, fire_once, Policy::Always)
    }

    /// Register a point that fails with `probability`, stored as given.
    pub fn register_probabilistic(
        &mut self,
        name: &str,
        fail_num: i32,
        value: &Value,
        probability: f32,
        fire_once: bool,
    ) -> Result<()> {
        self.build_and_register(
            name,
            fail_num,
            value,
            fire_once,
            Policy::Probabilistic { probability },
        )
    }

    /// Register a point decided by the predicate bound to `symbol`.
    pub fn register_external_predicate(
        &mut self,
        name: &str,
        fail_num: i32,
        value: &Value,
        symbol: &str,
        fire_once: bool,
    ) -> Result<()> {
        self.build_and_register(
            name,
            fail_num,
            value,
            fire_once,
            Policy::ExternalPredicate {
                symbol: symbol.to_string(),
            },
        )
    }

    /// Register a point that fails while `function` is on the call stack.
    pub fn register_stack_conditioned(
        &mut self,
        name: &str,
        fail_num: i32,
        value: &Value,
        function: &str,
        fire_once: bool,
    ) -> Result<()> {
        self.build_and_register(
            name,
            fail_num,
            value,
            fire_once,
            Policy::StackConditioned {
                function: function.to_string(),
            },
        )
    }

    // ── Arming ──────────────────────────────────────────────────

    /// Install at the next qualifying hook.
    ///
    /// Has no effect while points are installed: arming applies to the
    /// next transaction, which cannot start before this one ends.
    pub fn arm(&mut self) {
        if self.installed {
            debug!("Arm ignored: failure points already installed");
            return;
        }
        if !self.armed {
            info!("Armed for next transaction ({} points)", self.registry.len());
        }
        self.armed = true;
    }

    /// Cancel a pending installation.
    pub fn disarm(&mut self) {
        if self.armed {
            info!("Disarmed");
        }
        self.armed = false;
    }

    /// Assign [`INJECT_NEXT_XACT`] on behalf of a session.
    pub fn set_inject_next_xact(&mut self, value: bool, privilege: Privilege) -> Result<()> {
        if self.config.toggle_superuser_only && privilege != Privilege::Superuser {
            warn!("Permission denied to set {INJECT_NEXT_XACT}");
            return Err(FaultError::PermissionDenied {
                setting: INJECT_NEXT_XACT,
            });
        }
        if value {
            self.arm();
        } else {
            self.disarm();
        }
        Ok(())
    }

    // ── Transitions ─────────────────────────────────────────────

    /// Install every registered point if armed and not yet installed.
    ///
    /// Returns whether this call installed.  Repeated calls within one
    /// transaction are no-ops.  If the injector rejects a point, the
    /// points enabled so far are disabled again, the controller is
    /// disarmed, and the error is returned.
    pub fn maybe_install(&mut self) -> Result<bool> {
        self.check_invariants()?;
        if !self.armed || self.installed {
            return Ok(false);
        }

        info!("Installing {} failure points", self.registry.len());
        let mut failure = None;
        for (index, point) in self.registry.iter().enumerate() {
            if let Err(err) = dispatch::activate(&mut self.injector, &self.predicates, point) {
                failure = Some((index, err));
                break;
            }
        }

        if let Some((enabled, err)) = failure {
            warn!("Installation aborted after {enabled} points: {err}");
            for point in self.registry.iter().take(enabled) {
                if let Err(rollback) = dispatch::deactivate(&mut self.injector, point) {
                    warn!("Rollback of {} failed: {rollback}", point.name());
                }
            }
            self.armed = false;
            return Err(err);
        }

        self.installed = true;
        self.armed = false;
        self.installs += 1;
        Ok(true)
    }

    /// Uninstall every registered point if installed.
    ///
    /// Returns whether this call uninstalled.  Every point is disabled
    /// even if some disable calls fail; the first failure is returned
    /// after the controller has left the installed state.
    pub fn on_transaction_end(&mut self) -> Result<bool> {
        self.check_invariants()?;
        if !self.installed {
            return Ok(false);
        }

        info!("Uninstalling {} failure points", self.registry.len());
        let mut first_error = None;
        for point in self.registry.iter() {
            if let Err(err) = dispatch::deactivate(&mut self.injector, point) {
                warn!("Failed to disable {}: {err}", point.name());
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        self.installed = false;

        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    // ── Introspection ───────────────────────────────────────────

    /// Registered points as rows, in registration order.
    pub fn enumerate(&self) -> Rows<'_> {
        view::rows(&self.registry)
    }

    pub fn state(&self) -> LifecycleState {
        match (self.armed, self.installed) {
            (_, true) => LifecycleState::Active,
            (true, false) => LifecycleState::Armed,
            (false, false) => LifecycleState::Idle,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Completed installations since creation.
    pub fn installs(&self) -> u64 {
        self.installs
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &FailureRegistry {
        &self.registry
    }

    pub fn predicates(&self) -> &PredicateTable {
        &self.predicates
    }

    /// Predicate bindings may change at any time; they are resolved at
    /// installation.
    pub fn predicates_mut(&mut self) -> &mut PredicateTable {
        &mut self.predicates
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }

    pub fn injector_mut(&mut self) -> &mut I {
        &mut self.injector
    }

    // ── Internal ────────────────────────────────────────────────

    fn build_and_register(
        &mut self,
        name: &str,
        fail_num: i32,
        value: &Value,
        fire_once: bool,
        policy: Policy,
    ) -> Result<()> {
        if self.installed {
            return Err(FaultError::RegistrationWhileInstalled);
        }
        let point = FailurePoint::new(name, fail_num, value, fire_once, policy)?;
        self.register(point)
    }

    fn check_invariants(&self) -> Result<()> {
        if self.armed && self.installed {
            return Err(FaultError::InvariantViolation(
                "armed while failure points are installed".to_string(),
            ));
        }
        Ok(())
    }
}

impl<I: FaultInjector> fmt::Debug for Controller<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("points", &self.registry.len())
            .field("predicates", &self.predicates)
            .field("observers", &self.observers.len())
            .field("installs", &self.installs)
            .finish()
    }
}

/// Builder for a controller with a custom injector, a pre-declared
/// registry, predicates, and chained lifecycle observers.
///
/// # Example
///
/// ```
/// use txfault::controller::{ControllerBuilder, ControllerConfig};
/// use txfault::injector::RecordingInjector;
/// use txfault::payload::Value;
/// use txfault::registry::FailureRegistryBuilder;
///
/// let registry = FailureRegistryBuilder::new()
///     .external("posix/io/net/send", 104, Value::Null, "peer_reset", false)?
///     .build();
///
/// let mut controller = ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new())
///     .registry(registry)
///     .predicate("peer_reset", |_, _| true)
///     .build();
///
/// controller.arm();
/// controller.on_pre_execute()?;
/// assert_eq!(controller.injector().enable_count("posix/io/net/send"), 1);
/// # Ok::<(), txfault::error::FaultError>(())
/// ```
pub struct ControllerBuilder<I: FaultInjector> {
    config: ControllerConfig,
    injector: I,
    registry: FailureRegistry,
    predicates: PredicateTable,
    observers: Vec<Box<dyn LifecycleObserver>>,
}

impl<I: FaultInjector> ControllerBuilder<I> {
    pub fn new(config: ControllerConfig, injector: I) -> Self {
        Self {
            config,
            injector,
            registry: FailureRegistry::new(),
            predicates: PredicateTable::new(),
            observers: Vec::new(),
        }
    }

    /// Start from a pre-declared registry.
    pub fn registry(mut self, registry: FailureRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Start from a predicate table.
    pub fn predicates(mut self, predicates: PredicateTable) -> Self {
        self.predicates = predicates;
        self
    }

    /// Bind one predicate symbol.
    pub fn predicate<F>(mut self, symbol: &str, predicate: F) -> Self
    where
        F: Fn(&str, &mut i32) -> bool + Send + Sync + 'static,
    {
        self.predicates.bind(symbol, predicate);
        self
    }

    /// Chain an observer; observers run in the order they are added,
    /// after the controller has handled the event.
    pub fn observer(mut self, observer: Box<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Build the controller.
    pub fn build(self) -> Controller<I> {
        let armed = self.config.inject_next_xact;
        Controller {
            config: self.config,
            registry: self.registry,
            predicates: self.predicates,
            injector: self.injector,
            observers: self.observers,
            armed,
            installed: false,
            installs: 0,
        }
    }
}
