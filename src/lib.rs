//! Campaign expiration engine for a CRM pipeline.
//!
//! Tracks the cohort of cards that entered a campaign's base
//! (pipeline, status) pair, snapshots their entry timestamps into a blob
//! store, and later reports which cards have outlived the campaign's day
//! TTL — re-verifying live card location before anything is marked safe to
//! move to the expiration target.
//!
//! State round-trips entirely through the snapshot store; each entry point
//! (resolve, collect, evaluate, remove) runs to completion within a single
//! invocation with sequential awaits and no locking. Concurrent collections
//! race with last-writer-wins full-replacement semantics.

pub mod campaign;
pub mod config;
pub mod crm;
pub mod extract;
pub mod store;
pub mod util;
