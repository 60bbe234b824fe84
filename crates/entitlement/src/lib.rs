#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadPilot Entitlement Engine
//!
//! Everything that decides what a workspace may do and what it has already
//! spent: the plan catalog, the per-cycle usage ledger, the entitlement
//! resolver, the two-phase operation gate, the billing-cycle resetter, and
//! the payment webhook processor.
//!
//! The engine owns no in-process state; all mutual exclusion goes through
//! Postgres row locks so concurrent API instances stay correct.

pub mod audit;
pub mod catalog;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod reset;
pub mod resolver;
pub mod webhook;

pub use audit::{UsageLog, UsageLogger};
pub use catalog::{Plan, PlanCatalog, PlanDisplay, PlanLimits};
pub use error::{EntitlementError, EntitlementResult};
pub use gate::{ChargeOutcome, DenyReason, GateDecision, OperationGate, OperationKind, MAX_COST};
pub use ledger::{LedgerStore, UsageLedger};
pub use reset::{CycleResetter, SweepOutcome, CYCLE_PERIOD};
pub use resolver::{EntitlementResolver, EntitlementSnapshot, RemainingResources};
pub use webhook::{
    verify_signature, AckStatus, PaymentEvent, PaymentEventData, PaymentWebhookProcessor,
    WebhookAck,
};
