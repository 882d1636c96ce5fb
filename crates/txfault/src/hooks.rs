//! Host lifecycle hooks.
//!
//! The host calls these entry points at fixed places in its statement
//! and transaction processing:
//!
//! | Host event                | Entry point                          | Controller action        |
//! |---------------------------|--------------------------------------|--------------------------|
//! | after parse analysis      | [`Controller::on_pre_parse`]         | `maybe_install`          |
//! | before executor start     | [`Controller::on_pre_execute`]       | `maybe_install`          |
//! | before utility statement  | [`Controller::on_pre_utility`]       | toggle, `maybe_install`  |
//! | transaction callback      | [`Controller::on_xact_event`]        | `on_transaction_end`     |
//!
//! Each entry point lets the controller act first and then runs the
//! chained [`LifecycleObserver`]s in the order they were added.  An
//! error stops the chain and should abort the host operation.

use crate::controller::{Controller, Privilege};
use crate::error::Result;
use crate::injector::FaultInjector;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction callback events delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XactEvent {
    Commit,
    ParallelCommit,
    Abort,
    ParallelAbort,
    PreCommit,
    ParallelPreCommit,
    Prepare,
    PrePrepare,
}

impl XactEvent {
    /// Whether the event finishes the transaction (commit or abort).
    pub fn ends_transaction(self) -> bool {
        matches!(
            self,
            XactEvent::Commit | XactEvent::ParallelCommit | XactEvent::Abort | XactEvent::ParallelAbort
        )
    }
}

impl fmt::Display for XactEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            XactEvent::Commit => "commit",
            XactEvent::ParallelCommit => "parallel-commit",
            XactEvent::Abort => "abort",
            XactEvent::ParallelAbort => "parallel-abort",
            XactEvent::PreCommit => "pre-commit",
            XactEvent::ParallelPreCommit => "parallel-pre-commit",
            XactEvent::Prepare => "prepare",
            XactEvent::PrePrepare => "pre-prepare",
        };
        write!(f, "{name}")
    }
}

/// A utility statement about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilityStatement {
    /// Assignment to the inject-next-transaction setting.  Applied by
    /// the controller after the install check; assigning `false` never
    /// installs.
    SetInjectNextXact { value: bool, privilege: Privilege },
    /// Any other utility statement, identified by its command tag.
    Other { tag: String },
}

/// A handler chained after the controller on host lifecycle events.
///
/// All methods default to doing nothing.
pub trait LifecycleObserver {
    fn on_pre_parse(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_pre_execute(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_pre_utility(&mut self, _statement: &UtilityStatement) -> Result<()> {
        Ok(())
    }

    fn on_xact_event(&mut self, _event: XactEvent) -> Result<()> {
        Ok(())
    }
}

impl<I: FaultInjector> Controller<I> {
    /// Hook: parse analysis of a statement finished.
    pub fn on_pre_parse(&mut self) -> Result<()> {
        debug!("Hook: pre-parse");
        self.maybe_install()?;
        for observer in self.observers.iter_mut() {
            observer.on_pre_parse()?;
        }
        Ok(())
    }

    /// Hook: the executor is about to start.
    pub fn on_pre_execute(&mut self) -> Result<()> {
        debug!("Hook: pre-execute");
        self.maybe_install()?;
        for observer in self.observers.iter_mut() {
            observer.on_pre_execute()?;
        }
        Ok(())
    }

    /// Hook: a utility statement is about to run.
    pub fn on_pre_utility(&mut self, statement: &UtilityStatement) -> Result<()> {
        debug!("Hook: pre-utility {statement:?}");
        match statement {
            UtilityStatement::SetInjectNextXact { value, privilege } => {
                // Installation reflects the setting as it stood before
                // this statement; turning injection off never installs.
                if *value {
                    self.maybe_install()?;
                }
                self.set_inject_next_xact(*value, *privilege)?;
            }
            UtilityStatement::Other { .. } => {
                self.maybe_install()?;
            }
        }
        for observer in self.observers.iter_mut() {
            observer.on_pre_utility(statement)?;
        }
        Ok(())
    }

    /// Hook: transaction callback.  Only commit and abort uninstall.
    pub fn on_xact_event(&mut self, event: XactEvent) -> Result<()> {
        debug!("Hook: transaction {event}");
        if event.ends_transaction() {
            self.on_transaction_end()?;
        }
        for observer in self.observers.iter_mut() {
            observer.on_xact_event(event)?;
        }
        Ok(())
    }

    pub fn on_transaction_commit(&mut self) -> Result<()> {
        self.on_xact_event(XactEvent::Commit)
    }

    pub fn on_transaction_abort(&mut self) -> Result<()> {
        self.on_xact_event(XactEvent::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerBuilder, ControllerConfig, LifecycleState};
    use crate::error::FaultError;
    use crate::injector::RecordingInjector;
    use crate::payload::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracer {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl LifecycleObserver for Tracer {
        fn on_pre_parse(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:parse", self.label));
            Ok(())
        }

        fn on_xact_event(&mut self, event: XactEvent) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:{event}", self.label));
            Ok(())
        }
    }

    struct Failing;

    impl LifecycleObserver for Failing {
        fn on_pre_execute(&mut self) -> Result<()> {
            Err(FaultError::InvariantViolation("observer refused".into()))
        }
    }

    fn traced(log: &Rc<RefCell<Vec<String>>>) -> Controller<RecordingInjector> {
        ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new())
            .observer(Box::new(Tracer {
                label: "first",
                log: Rc::clone(log),
            }))
            .observer(Box::new(Tracer {
                label: "second",
                log: Rc::clone(log),
            }))
            .build()
    }

    #[test]
    fn only_commit_and_abort_end_transactions() {
        assert!(XactEvent::Commit.ends_transaction());
        assert!(XactEvent::Abort.ends_transaction());
        assert!(XactEvent::ParallelCommit.ends_transaction());
        assert!(XactEvent::ParallelAbort.ends_transaction());
        assert!(!XactEvent::PreCommit.ends_transaction());
        assert!(!XactEvent::Prepare.ends_transaction());
        assert!(!XactEvent::PrePrepare.ends_transaction());
        assert!(!XactEvent::ParallelPreCommit.ends_transaction());
    }

    #[test]
    fn observers_run_in_order_after_controller() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut controller = traced(&log);
        controller.arm();
        controller.on_pre_parse().unwrap();
        assert!(controller.is_installed());
        controller.on_transaction_commit().unwrap();

        assert_eq!(
            *log.borrow(),
            ["first:parse", "second:parse", "first:commit", "second:commit"]
        );
    }

    #[test]
    fn every_statement_hook_installs() {
        for hook in 0..3 {
            let mut controller =
                ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new())
                    .build();
            controller.register_always("p", 1, &Value::Null, false).unwrap();
            controller.arm();
            match hook {
                0 => controller.on_pre_parse().unwrap(),
                1 => controller.on_pre_execute().unwrap(),
                _ => controller
                    .on_pre_utility(&UtilityStatement::Other {
                        tag: "VACUUM".into(),
                    })
                    .unwrap(),
            }
            assert!(controller.is_installed());
        }
    }

    #[test]
    fn repeated_hooks_install_once() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new()).build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();
        controller.arm();
        controller.on_pre_parse().unwrap();
        controller.on_pre_execute().unwrap();
        controller.on_pre_parse().unwrap();
        controller.on_pre_execute().unwrap();
        assert_eq!(controller.injector().enable_count("p"), 1);
    }

    #[test]
    fn non_terminal_xact_events_keep_points_installed() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new()).build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();
        controller.arm();
        controller.on_pre_execute().unwrap();

        controller.on_xact_event(XactEvent::PreCommit).unwrap();
        controller.on_xact_event(XactEvent::PrePrepare).unwrap();
        controller.on_xact_event(XactEvent::Prepare).unwrap();
        assert!(controller.is_installed());
        assert_eq!(controller.injector().disable_count("p"), 0);

        controller.on_transaction_abort().unwrap();
        assert!(!controller.is_installed());
        assert_eq!(controller.injector().disable_count("p"), 1);
    }

    #[test]
    fn setting_assignment_arms_without_installing() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new()).build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();

        controller
            .on_pre_utility(&UtilityStatement::SetInjectNextXact {
                value: true,
                privilege: Privilege::Superuser,
            })
            .unwrap();
        assert_eq!(controller.state(), LifecycleState::Armed);
        assert!(controller.injector().calls().is_empty());

        // The assignment's own transaction ends; the next statement installs.
        controller.on_transaction_commit().unwrap();
        controller.on_pre_parse().unwrap();
        assert_eq!(controller.state(), LifecycleState::Active);
    }

    #[test]
    fn enabling_assignment_installs_when_already_armed() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new()).build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();
        controller.arm();

        controller
            .on_pre_utility(&UtilityStatement::SetInjectNextXact {
                value: true,
                privilege: Privilege::Superuser,
            })
            .unwrap();
        assert_eq!(controller.state(), LifecycleState::Active);
        assert_eq!(controller.injector().enable_count("p"), 1);

        controller.on_transaction_commit().unwrap();
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[test]
    fn disabling_assignment_never_installs() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new()).build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();
        controller.arm();

        controller
            .on_pre_utility(&UtilityStatement::SetInjectNextXact {
                value: false,
                privilege: Privilege::Superuser,
            })
            .unwrap();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert!(controller.injector().calls().is_empty());
    }

    #[test]
    fn observer_error_propagates() {
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::new())
                .observer(Box::new(Failing))
                .build();
        controller.arm();
        assert!(controller.on_pre_execute().is_err());
        // The controller acted before the failing observer ran.
        assert!(controller.is_installed());
    }

    #[test]
    fn install_error_skips_observers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut controller =
            ControllerBuilder::new(ControllerConfig::default(), RecordingInjector::refusing("p"))
                .observer(Box::new(Tracer {
                    label: "only",
                    log: Rc::clone(&log),
                }))
                .build();
        controller.register_always("p", 1, &Value::Null, false).unwrap();
        controller.arm();
        assert!(controller.on_pre_parse().is_err());
        assert!(log.borrow().is_empty());
    }
}
