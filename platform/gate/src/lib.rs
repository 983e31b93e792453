//! The request gate.
//!
//! [`Engine`] is constructed once per process and handed to whatever serves
//! requests. Each protected operation runs authenticate, authorize and meter
//! in that order; the first failing step short-circuits and every outcome is
//! sent to the audit sink.

mod clock;
mod engine;
mod error;
mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Admission, CreditBalance, Engine, EngineBuilder, ResourceUsage, UsageSummary};
pub use error::GateError;
pub use policy::{ActionRule, Policy, PolicyDocument, PolicyLoadError};

pub use platform_authn::Caller;
pub use platform_metering::Receipt;
