//! Session scripts — JSON descriptions of a client/host session.
//!
//! A script declares the controller configuration, the predicates to
//! bind, and a sequence of steps replayed against a controller: client
//! calls (`register`, `arm`, `set`, `list`, `state`), host hooks
//! (`parse`, `execute`, `utility`, `xact`) and probes of instrumented
//! call sites (`check`).
//!
//! ```json
//! {
//!   "config": { "seed": 7 },
//!   "predicates": { "every_other": { "kind": "every_nth", "n": 2 } },
//!   "steps": [
//!     { "step": "register", "name": "posix/io/rw/write", "fail_num": 28,
//!       "type": "text", "value": "ENOSPC", "policy": { "kind": "always" } },
//!     { "step": "arm" },
//!     { "step": "parse" },
//!     { "step": "check", "name": "posix/io/rw/write" },
//!     { "step": "xact", "event": "commit" }
//!   ]
//! }
//! ```

use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use txfault::controller::{Controller, ControllerConfig, Privilege};
use txfault::error::FaultError;
use txfault::hooks::{UtilityStatement, XactEvent};
use txfault::injector::{FaultInjector, InMemoryInjector, RecordingInjector};
use txfault::payload::Value;

/// Errors from loading or running a script.
#[derive(Debug, Snafu)]
pub enum ScriptError {
    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },

    #[snafu(display("step {index} failed"))]
    Step { index: usize, source: FaultError },
}

/// A whole session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub config: ControllerConfig,
    pub predicates: BTreeMap<String, PredicateSpec>,
    pub steps: Vec<Step>,
}

/// Built-in predicates a script can bind by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateSpec {
    Always,
    Never,
    /// Fires on every `n`-th evaluation.
    EveryNth { n: u64 },
    /// Always fires, replacing the point's fail number.
    Rewrite { fail_num: i32 },
}

/// Trigger policy of a registered point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    Always,
    Probabilistic { probability: f32 },
    External { symbol: String },
    Stack { function: String },
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Register {
        name: String,
        fail_num: i32,
        /// Declared failinfo type; omitted means no failinfo.
        #[serde(rename = "type", default)]
        type_name: Option<String>,
        #[serde(default)]
        value: String,
        #[serde(default)]
        once: bool,
        policy: PolicySpec,
    },
    Arm,
    Set {
        value: bool,
        #[serde(default)]
        superuser: bool,
    },
    Parse,
    Execute,
    Utility {
        tag: String,
    },
    Xact {
        event: XactEvent,
    },
    Check {
        name: String,
        /// Call stack, innermost frame first.
        #[serde(default)]
        stack: Vec<String>,
    },
    List,
    State,
}

/// Load a script from a JSON file.
pub fn load_script<P: AsRef<Path>>(path: P) -> Result<Script, ScriptError> {
    let json = fs::read_to_string(path)?;
    let script = serde_json::from_str(&json)?;
    Ok(script)
}

/// An injector the session runner can probe and report on.
pub trait SessionInjector: FaultInjector {
    /// Evaluate a point as an instrumented call site would.
    fn check(&mut self, name: &str, stack: &[&str]) -> String;

    /// Lines summarising the injector after the run.
    fn report(&self) -> Vec<String> {
        Vec::new()
    }
}

impl SessionInjector for InMemoryInjector {
    fn check(&mut self, name: &str, stack: &[&str]) -> String {
        match self.fail(name, stack) {
            Some(failure) => {
                let info = failure
                    .fail_info
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("{name}: FAIL fail_num={} info={info}", failure.fail_num)
            }
            None => format!("{name}: ok"),
        }
    }

    fn report(&self) -> Vec<String> {
        vec![format!("failures reported: {}", self.fired())]
    }
}

impl SessionInjector for RecordingInjector {
    fn check(&mut self, name: &str, _stack: &[&str]) -> String {
        format!("{name}: not evaluated (dry run)")
    }

    fn report(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }
}

/// Summary of a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: usize,
    pub errors: usize,
}

/// Replays a script's steps against a controller.
pub struct Session<I: SessionInjector> {
    controller: Controller<I>,
    output: Vec<String>,
}

impl<I: SessionInjector> Session<I> {
    /// Wrap a controller and bind the script's predicates into it.
    pub fn new(mut controller: Controller<I>, predicates: &BTreeMap<String, PredicateSpec>) -> Self {
        for (symbol, spec) in predicates {
            bind_predicate(&mut controller, symbol, spec);
        }
        Self {
            controller,
            output: Vec::new(),
        }
    }

    /// Run every step.  Step errors are reported and the session moves
    /// on, unless `fail_fast` is set.
    pub fn run(&mut self, steps: &[Step], fail_fast: bool) -> Result<RunSummary, ScriptError> {
        let mut summary = RunSummary::default();
        for (index, step) in steps.iter().enumerate() {
            summary.steps += 1;
            if let Err(err) = self.apply(index, step) {
                summary.errors += 1;
                self.output.push(format!("[{index}] error: {err}"));
                if fail_fast {
                    return Err(err).context(StepSnafu { index });
                }
            }
        }
        info!(
            "Session finished: {} steps, {} errors",
            summary.steps, summary.errors
        );
        Ok(summary)
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn controller(&self) -> &Controller<I> {
        &self.controller
    }

    fn apply(&mut self, index: usize, step: &Step) -> Result<(), FaultError> {
        debug!("Step {step:?}");
        match step {
            Step::Register {
                name,
                fail_num,
                type_name,
                value,
                once,
                policy,
            } => {
                let value = match type_name {
                    Some(type_name) => Value::parse(type_name, value)?,
                    None => Value::Null,
                };
                match policy {
                    PolicySpec::Always => {
                        self.controller
                            .register_always(name, *fail_num, &value, *once)?
                    }
                    PolicySpec::Probabilistic { probability } => self
                        .controller
                        .register_probabilistic(name, *fail_num, &value, *probability, *once)?,
                    PolicySpec::External { symbol } => self
                        .controller
                        .register_external_predicate(name, *fail_num, &value, symbol, *once)?,
                    PolicySpec::Stack { function } => self
                        .controller
                        .register_stack_conditioned(name, *fail_num, &value, function, *once)?,
                }
                self.output.push(format!("[{index}] registered {name}"));
            }
            Step::Arm => {
                self.controller.arm();
                self.output
                    .push(format!("[{index}] arm -> {}", self.controller.state()));
            }
            Step::Set { value, superuser } => {
                let privilege = if *superuser {
                    Privilege::Superuser
                } else {
                    Privilege::Ordinary
                };
                self.controller
                    .on_pre_utility(&UtilityStatement::SetInjectNextXact {
                        value: *value,
                        privilege,
                    })?;
                self.output
                    .push(format!("[{index}] set -> {}", self.controller.state()));
            }
            Step::Parse => {
                self.controller.on_pre_parse()?;
                self.output
                    .push(format!("[{index}] parse -> {}", self.controller.state()));
            }
            Step::Execute => {
                self.controller.on_pre_execute()?;
                self.output
                    .push(format!("[{index}] execute -> {}", self.controller.state()));
            }
            Step::Utility { tag } => {
                self.controller
                    .on_pre_utility(&UtilityStatement::Other { tag: tag.clone() })?;
                self.output
                    .push(format!("[{index}] {tag} -> {}", self.controller.state()));
            }
            Step::Xact { event } => {
                self.controller.on_xact_event(*event)?;
                self.output
                    .push(format!("[{index}] {event} -> {}", self.controller.state()));
            }
            Step::Check { name, stack } => {
                let frames: Vec<&str> = stack.iter().map(String::as_str).collect();
                let line = self.controller.injector_mut().check(name, &frames);
                self.output.push(format!("[{index}] {line}"));
            }
            Step::List => {
                for row in self.controller.enumerate() {
                    let json = serde_json::to_string(&row)
                        .unwrap_or_else(|err| format!("<unserializable row: {err}>"));
                    self.output.push(format!("[{index}] {json}"));
                }
            }
            Step::State => {
                self.output.push(format!(
                    "[{index}] state={} points={} installs={}",
                    self.controller.state(),
                    self.controller.registry().len(),
                    self.controller.installs()
                ));
            }
        }
        Ok(())
    }
}

fn bind_predicate<I: FaultInjector>(
    controller: &mut Controller<I>,
    symbol: &str,
    spec: &PredicateSpec,
) {
    let predicates = controller.predicates_mut();
    match *spec {
        PredicateSpec::Always => {
            predicates.bind(symbol, |_, _| true);
        }
        PredicateSpec::Never => {
            predicates.bind(symbol, |_, _| false);
        }
        PredicateSpec::EveryNth { n } => {
            let calls = AtomicU64::new(0);
            let n = n.max(1);
            predicates.bind(symbol, move |_, _| {
                (calls.fetch_add(1, Ordering::Relaxed) + 1) % n == 0
            });
        }
        PredicateSpec::Rewrite { fail_num } => {
            predicates.bind(symbol, move |_, current| {
                *current = fail_num;
                true
            });
        }
    }
}
