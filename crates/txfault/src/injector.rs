//! Fault-injection primitive contract and two implementations.
//!
//! The controller never intercepts calls itself.  It enables and
//! disables points in a [`FaultInjector`], which is what instrumented
//! call sites consult.  Two injectors ship with the crate:
//!
//! - [`InMemoryInjector`] evaluates points in-process and answers
//!   [`InMemoryInjector::fail`] queries from instrumented code.
//! - [`RecordingInjector`] only records the calls it receives, for dry
//!   runs and for asserting on dispatch order.

use crate::payload::Payload;
use crate::point::ANY_STACK_POS;
use crate::predicate::ExternalPredicate;
use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors from the fault-injection primitive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InjectorError {
    #[error("no external callback supplied")]
    MissingCallback,

    #[error("activation refused: {0}")]
    Refused(String),
}

/// Arguments shared by every enable call.
#[derive(Debug, Clone, Copy)]
pub struct Activation<'a> {
    pub name: &'a str,
    pub fail_num: i32,
    pub fail_info: Option<&'a Payload>,
    /// Disable the point after it fires once.
    pub one_shot: bool,
}

/// The activation surface of a fault-injection primitive.
///
/// Enabling a name that is already enabled replaces the previous
/// configuration.  Disabling is idempotent.
pub trait FaultInjector {
    /// Fail every evaluation.
    fn enable(&mut self, activation: Activation<'_>) -> Result<(), InjectorError>;

    /// Fail with the given probability.
    fn enable_random(
        &mut self,
        activation: Activation<'_>,
        probability: f32,
    ) -> Result<(), InjectorError>;

    /// Fail when `predicate` says so.  `None` means the caller could not
    /// resolve one; the injector decides whether that is acceptable.
    fn enable_external(
        &mut self,
        activation: Activation<'_>,
        predicate: Option<ExternalPredicate>,
    ) -> Result<(), InjectorError>;

    /// Fail when `function` is on the call stack at `pos_in_stack`
    /// ([`ANY_STACK_POS`] for any depth).
    fn enable_stack_by_name(
        &mut self,
        activation: Activation<'_>,
        function: &str,
        pos_in_stack: i32,
    ) -> Result<(), InjectorError>;

    /// Disable the point called `name`.
    fn disable(&mut self, name: &str) -> Result<(), InjectorError>;
}

// ═══════════════════════════════════════════════════════════════════════
//  In-memory injector
// ═══════════════════════════════════════════════════════════════════════

/// A failure reported to an instrumented call site.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub fail_num: i32,
    pub fail_info: Option<Payload>,
}

enum Trigger {
    Always,
    Random { probability: f32 },
    External(ExternalPredicate),
    Stack { function: String, pos_in_stack: i32 },
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Always => write!(f, "Always"),
            Trigger::Random { probability } => write!(f, "Random({probability})"),
            Trigger::External(_) => write!(f, "External"),
            Trigger::Stack {
                function,
                pos_in_stack,
            } => write!(f, "Stack({function}@{pos_in_stack})"),
        }
    }
}

#[derive(Debug)]
struct EnabledPoint {
    fail_num: i32,
    fail_info: Option<Payload>,
    one_shot: bool,
    trigger: Trigger,
}

/// In-process injector with seeded randomness.
///
/// # Example
///
/// ```
/// use txfault::injector::{Activation, FaultInjector, InMemoryInjector};
///
/// let mut injector = InMemoryInjector::with_seed(7);
/// injector.enable(Activation {
///     name: "posix/io/rw/write",
///     fail_num: 28,
///     fail_info: None,
///     one_shot: true,
/// })?;
///
/// assert_eq!(injector.fail("posix/io/rw/write", &[]).map(|f| f.fail_num), Some(28));
/// // One-shot points disable themselves after firing.
/// assert!(injector.fail("posix/io/rw/write", &[]).is_none());
/// # Ok::<(), txfault::injector::InjectorError>(())
/// ```
#[derive(Debug)]
pub struct InMemoryInjector {
    points: BTreeMap<String, EnabledPoint>,
    rng: ChaCha8Rng,
    /// Total failures reported.
    fired: u64,
}

impl InMemoryInjector {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            points: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            fired: 0,
        }
    }

    /// Evaluate the point called `name`.
    ///
    /// `call_stack` lists the caller's frames innermost first; it only
    /// matters for stack-conditioned points.  Returns `None` when the
    /// point is not enabled or does not trigger.
    pub fn fail(&mut self, name: &str, call_stack: &[&str]) -> Option<Failure> {
        let point = self.points.get(name)?;
        let mut fail_num = point.fail_num;

        let fires = match &point.trigger {
            Trigger::Always => true,
            Trigger::Random { probability } => self.rng.gen::<f32>() < *probability,
            Trigger::External(predicate) => predicate(name, &mut fail_num),
            Trigger::Stack {
                function,
                pos_in_stack,
            } => on_stack(call_stack, function, *pos_in_stack),
        };
        if !fires {
            return None;
        }

        let failure = Failure {
            fail_num,
            fail_info: point.fail_info.clone(),
        };
        if point.one_shot {
            debug!("One-shot point {name} fired, disabling");
            self.points.remove(name);
        }
        self.fired += 1;
        Some(failure)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.points.contains_key(name)
    }

    /// Enabled point names in lexicographic order.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    /// Total failures reported since creation.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    fn insert(&mut self, activation: Activation<'_>, trigger: Trigger) {
        debug!("Enabling {} as {trigger:?}", activation.name);
        self.points.insert(
            activation.name.to_string(),
            EnabledPoint {
                fail_num: activation.fail_num,
                fail_info: activation.fail_info.cloned(),
                one_shot: activation.one_shot,
                trigger,
            },
        );
    }
}

fn on_stack(call_stack: &[&str], function: &str, pos_in_stack: i32) -> bool {
    if pos_in_stack == ANY_STACK_POS {
        return call_stack.iter().any(|frame| *frame == function);
    }
    usize::try_from(pos_in_stack)
        .ok()
        .and_then(|pos| call_stack.get(pos))
        .is_some_and(|frame| *frame == function)
}

impl FaultInjector for InMemoryInjector {
    fn enable(&mut self, activation: Activation<'_>) -> Result<(), InjectorError> {
        self.insert(activation, Trigger::Always);
        Ok(())
    }

    fn enable_random(
        &mut self,
        activation: Activation<'_>,
        probability: f32,
    ) -> Result<(), InjectorError> {
        self.insert(activation, Trigger::Random { probability });
        Ok(())
    }

    fn enable_external(
        &mut self,
        activation: Activation<'_>,
        predicate: Option<ExternalPredicate>,
    ) -> Result<(), InjectorError> {
        let predicate = predicate.ok_or_else(|| {
            warn!("Refusing external point {} without a callback", activation.name);
            InjectorError::MissingCallback
        })?;
        self.insert(activation, Trigger::External(predicate));
        Ok(())
    }

    fn enable_stack_by_name(
        &mut self,
        activation: Activation<'_>,
        function: &str,
        pos_in_stack: i32,
    ) -> Result<(), InjectorError> {
        self.insert(
            activation,
            Trigger::Stack {
                function: function.to_string(),
                pos_in_stack,
            },
        );
        Ok(())
    }

    fn disable(&mut self, name: &str) -> Result<(), InjectorError> {
        if self.points.remove(name).is_none() {
            debug!("Disable of {name}: not enabled");
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Recording injector
// ═══════════════════════════════════════════════════════════════════════

/// One call received by a [`RecordingInjector`].
#[derive(Debug, Clone, PartialEq)]
pub enum InjectorCall {
    Enable {
        name: String,
        fail_num: i32,
        fail_info: Option<Payload>,
        one_shot: bool,
    },
    EnableRandom {
        name: String,
        fail_num: i32,
        fail_info: Option<Payload>,
        one_shot: bool,
        probability: f32,
    },
    EnableExternal {
        name: String,
        fail_num: i32,
        fail_info: Option<Payload>,
        one_shot: bool,
        /// Whether a callback was supplied.
        resolved: bool,
    },
    EnableStack {
        name: String,
        fail_num: i32,
        fail_info: Option<Payload>,
        one_shot: bool,
        function: String,
        pos_in_stack: i32,
    },
    Disable {
        name: String,
    },
}

impl InjectorCall {
    /// Name of the point this call concerns.
    pub fn name(&self) -> &str {
        match self {
            InjectorCall::Enable { name, .. }
            | InjectorCall::EnableRandom { name, .. }
            | InjectorCall::EnableExternal { name, .. }
            | InjectorCall::EnableStack { name, .. }
            | InjectorCall::Disable { name } => name,
        }
    }

    pub fn is_enable(&self) -> bool {
        !matches!(self, InjectorCall::Disable { .. })
    }
}

fn info_text(fail_info: &Option<Payload>) -> String {
    fail_info
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for InjectorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let once = |one_shot: &bool| if *one_shot { ", once" } else { "" };
        match self {
            InjectorCall::Enable {
                name,
                fail_num,
                fail_info,
                one_shot,
            } => write!(
                f,
                "enable({name}, fail={fail_num}, info={}{})",
                info_text(fail_info),
                once(one_shot)
            ),
            InjectorCall::EnableRandom {
                name,
                fail_num,
                fail_info,
                one_shot,
                probability,
            } => write!(
                f,
                "enable_random({name}, fail={fail_num}, info={}, p={probability}{})",
                info_text(fail_info),
                once(one_shot)
            ),
            InjectorCall::EnableExternal {
                name,
                fail_num,
                fail_info,
                one_shot,
                resolved,
            } => write!(
                f,
                "enable_external({name}, fail={fail_num}, info={}, cb={}{})",
                info_text(fail_info),
                if *resolved { "bound" } else { "null" },
                once(one_shot)
            ),
            InjectorCall::EnableStack {
                name,
                fail_num,
                fail_info,
                one_shot,
                function,
                pos_in_stack,
            } => write!(
                f,
                "enable_stack_by_name({name}, fail={fail_num}, info={}, func={function}, pos={pos_in_stack}{})",
                info_text(fail_info),
                once(one_shot)
            ),
            InjectorCall::Disable { name } => write!(f, "disable({name})"),
        }
    }
}

/// Injector that records calls without evaluating anything.
///
/// It accepts external activations without a callback.  A name passed
/// to [`RecordingInjector::refusing`] makes every enable of that name
/// fail, which exercises partial-installation handling.
#[derive(Debug, Default, Clone)]
pub struct RecordingInjector {
    calls: Vec<InjectorCall>,
    refuse: Option<String>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that refuses to enable the point called `name`.
    pub fn refusing(name: impl Into<String>) -> Self {
        Self {
            calls: Vec::new(),
            refuse: Some(name.into()),
        }
    }

    /// All calls received, in order.
    pub fn calls(&self) -> &[InjectorCall] {
        &self.calls
    }

    /// Number of enable calls received for `name`.
    pub fn enable_count(&self, name: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| c.is_enable() && c.name() == name)
            .count()
    }

    /// Number of disable calls received for `name`.
    pub fn disable_count(&self, name: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| !c.is_enable() && c.name() == name)
            .count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    fn check(&self, name: &str) -> Result<(), InjectorError> {
        match &self.refuse {
            Some(refused) if refused == name => Err(InjectorError::Refused(name.to_string())),
            _ => Ok(()),
        }
    }
}

impl FaultInjector for RecordingInjector {
    fn enable(&mut self, activation: Activation<'_>) -> Result<(), InjectorError> {
        self.check(activation.name)?;
        self.calls.push(InjectorCall::Enable {
            name: activation.name.to_string(),
            fail_num: activation.fail_num,
            fail_info: activation.fail_info.cloned(),
            one_shot: activation.one_shot,
        });
        Ok(())
    }

    fn enable_random(
        &mut self,
        activation: Activation<'_>,
        probability: f32,
    ) -> Result<(), InjectorError> {
        self.check(activation.name)?;
        self.calls.push(InjectorCall::EnableRandom {
            name: activation.name.to_string(),
            fail_num: activation.fail_num,
            fail_info: activation.fail_info.cloned(),
            one_shot: activation.one_shot,
            probability,
        });
        Ok(())
    }

    fn enable_external(
        &mut self,
        activation: Activation<'_>,
        predicate: Option<ExternalPredicate>,
    ) -> Result<(), InjectorError> {
        self.check(activation.name)?;
        self.calls.push(InjectorCall::EnableExternal {
            name: activation.name.to_string(),
            fail_num: activation.fail_num,
            fail_info: activation.fail_info.cloned(),
            one_shot: activation.one_shot,
            resolved: predicate.is_some(),
        });
        Ok(())
    }

    fn enable_stack_by_name(
        &mut self,
        activation: Activation<'_>,
        function: &str,
        pos_in_stack: i32,
    ) -> Result<(), InjectorError> {
        self.check(activation.name)?;
        self.calls.push(InjectorCall::EnableStack {
            name: activation.name.to_string(),
            fail_num: activation.fail_num,
            fail_info: activation.fail_info.cloned(),
            one_shot: activation.one_shot,
            function: function.to_string(),
            pos_in_stack,
        });
        Ok(())
    }

    fn disable(&mut self, name: &str) -> Result<(), InjectorError> {
        self.calls.push(InjectorCall::Disable {
            name: name.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn activation(name: &str, one_shot: bool) -> Activation<'_> {
        Activation {
            name,
            fail_num: 1,
            fail_info: None,
            one_shot,
        }
    }

    #[test]
    fn always_fires_until_disabled() {
        let mut injector = InMemoryInjector::with_seed(1);
        injector.enable(activation("a", false)).unwrap();
        assert!(injector.fail("a", &[]).is_some());
        assert!(injector.fail("a", &[]).is_some());

        injector.disable("a").unwrap();
        assert!(injector.fail("a", &[]).is_none());
        // Disabling twice is fine.
        injector.disable("a").unwrap();
        assert_eq!(injector.fired(), 2);
    }

    #[test]
    fn unknown_point_never_fails() {
        let mut injector = InMemoryInjector::with_seed(1);
        assert!(injector.fail("nowhere", &["main"]).is_none());
    }

    #[test]
    fn failure_carries_payload() {
        let mut injector = InMemoryInjector::with_seed(1);
        let info = Payload::Text("ENOSPC".into());
        injector
            .enable(Activation {
                name: "write",
                fail_num: 28,
                fail_info: Some(&info),
                one_shot: false,
            })
            .unwrap();
        assert_eq!(
            injector.fail("write", &[]),
            Some(Failure {
                fail_num: 28,
                fail_info: Some(info)
            })
        );
    }

    #[test]
    fn random_respects_bounds() {
        let mut injector = InMemoryInjector::with_seed(99);
        injector.enable_random(activation("never", false), 0.0).unwrap();
        injector.enable_random(activation("always", false), 1.5).unwrap();
        for _ in 0..100 {
            assert!(injector.fail("never", &[]).is_none());
            assert!(injector.fail("always", &[]).is_some());
        }
    }

    #[test]
    fn random_is_deterministic_per_seed() {
        let run = |seed| {
            let mut injector = InMemoryInjector::with_seed(seed);
            injector.enable_random(activation("p", false), 0.5).unwrap();
            (0..64)
                .map(|_| injector.fail("p", &[]).is_some())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
        let hits = run(5).iter().filter(|hit| **hit).count();
        assert!(hits > 0 && hits < 64);
    }

    #[test]
    fn external_requires_callback() {
        let mut injector = InMemoryInjector::with_seed(1);
        assert_eq!(
            injector.enable_external(activation("ext", false), None),
            Err(InjectorError::MissingCallback)
        );
        assert!(!injector.is_enabled("ext"));
    }

    #[test]
    fn external_predicate_decides_and_rewrites() {
        let mut injector = InMemoryInjector::with_seed(1);
        let predicate: ExternalPredicate = Arc::new(|name, fail_num| {
            *fail_num = 77;
            name == "ext"
        });
        injector
            .enable_external(activation("ext", false), Some(predicate))
            .unwrap();
        assert_eq!(injector.fail("ext", &[]).map(|f| f.fail_num), Some(77));
    }

    #[test]
    fn stack_any_position() {
        let mut injector = InMemoryInjector::with_seed(1);
        injector
            .enable_stack_by_name(activation("fsync", false), "XLogFlush", ANY_STACK_POS)
            .unwrap();
        assert!(injector.fail("fsync", &["pg_fsync", "XLogFlush", "main"]).is_some());
        assert!(injector.fail("fsync", &["pg_fsync", "main"]).is_none());
    }

    #[test]
    fn stack_exact_position() {
        let mut injector = InMemoryInjector::with_seed(1);
        injector
            .enable_stack_by_name(activation("fsync", false), "XLogFlush", 1)
            .unwrap();
        assert!(injector.fail("fsync", &["pg_fsync", "XLogFlush"]).is_some());
        assert!(injector.fail("fsync", &["XLogFlush", "pg_fsync"]).is_none());
        assert!(injector.fail("fsync", &[]).is_none());
    }

    #[test]
    fn later_enable_replaces_earlier() {
        let mut injector = InMemoryInjector::with_seed(1);
        injector.enable(activation("x", false)).unwrap();
        injector.enable_random(activation("x", false), 0.0).unwrap();
        assert!(injector.fail("x", &[]).is_none());
        assert_eq!(injector.enabled().collect::<Vec<_>>(), ["x"]);
    }

    #[test]
    fn recorder_keeps_order_and_refuses() {
        let mut recorder = RecordingInjector::refusing("bad");
        recorder.enable(activation("a", true)).unwrap();
        assert_eq!(
            recorder.enable(activation("bad", false)),
            Err(InjectorError::Refused("bad".into()))
        );
        recorder.enable_external(activation("e", false), None).unwrap();
        recorder.disable("a").unwrap();

        let names: Vec<&str> = recorder.calls().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["a", "e", "a"]);
        assert_eq!(recorder.enable_count("a"), 1);
        assert_eq!(recorder.disable_count("a"), 1);
        assert_eq!(
            recorder.calls()[1].to_string(),
            "enable_external(e, fail=1, info=-, cb=null)"
        );
        assert_eq!(recorder.calls()[0].to_string(), "enable(a, fail=1, info=-, once)");
    }
}
