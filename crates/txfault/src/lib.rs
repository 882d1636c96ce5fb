//! Transaction-scoped fault injection.
//!
//! Failure points are declared between transactions, armed, and then
//! installed into a fault injector for exactly one host transaction:
//! the first statement hook after arming enables them, and the commit
//! or abort of that transaction disables them again.
//!
//! The crate is organised as:
//!
//! 1. **[`payload`]** — typed failinfo values and their encoding
//! 2. **[`point`]** / **[`registry`]** — failure point definitions and
//!    the ordered registry that holds them
//! 3. **[`controller`]** — the armed / installed state machine
//! 4. **[`dispatch`]** — maps each trigger policy onto an injector call
//! 5. **[`injector`]** — the injector contract, an in-process injector
//!    and a recording one
//! 6. **[`hooks`]** — host lifecycle entry points and chained observers
//! 7. **[`view`]** — introspection rows
//!
//! # Architecture
//!
//! ```text
//! Client                 Host hooks               Controller              Injector
//! ──────                 ──────────               ──────────              ────────
//! register_*()  ──────────────────────────────→ registry.push()
//! arm()         ──────────────────────────────→ armed = true
//!                        on_pre_parse()    ───→ maybe_install()  ───→ enable*()
//!                        on_pre_execute()  ───→ maybe_install()       (once)
//!                        on_xact_event()   ───→ on_transaction_end() → disable()
//! ```

pub mod controller;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod injector;
pub mod payload;
pub mod point;
pub mod predicate;
pub mod registry;
pub mod view;

pub use controller::{Controller, ControllerBuilder, ControllerConfig, LifecycleState, Privilege};
pub use error::FaultError;
pub use hooks::{LifecycleObserver, UtilityStatement, XactEvent};
pub use injector::{FaultInjector, InMemoryInjector, RecordingInjector};
pub use payload::Value;
pub use point::{FailurePoint, Policy};
