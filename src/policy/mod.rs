//! Security policies.
//!
//! Rules are loaded from YAML, their conditions compiled into a restricted
//! expression AST, and evaluated once per audio chunk by the
//! [`PolicyEngine`]. The compiled [`RuleSet`] is shared through a watch
//! channel and replaced wholesale by the [`PolicyReloader`].

pub mod daypart;
pub mod engine;
pub mod expr;
pub mod privacy;
pub mod reload;
pub mod rules;

pub use daypart::DayPart;
pub use engine::{PolicyEngine, PolicyOutcome};
pub use expr::{EvalError, Expr, ExprError, Facts};
pub use privacy::PrivacySwitch;
pub use reload::{PolicyReloader, ReloadOutcome};
pub use rules::{PolicyError, PolicyFile, PolicyRule, RuleEntry, RuleSet};
