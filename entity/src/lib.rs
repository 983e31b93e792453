//! sea-orm entities shared by the engine crates and the migrations.

pub mod audit_events;
pub mod cases;
pub mod credit_balances;
pub mod credit_entries;
pub mod memberships;
pub mod orgs;
pub mod usage_counters;
pub mod users;
