//! simalloc allocator service
//!
//! Hands each ephemeral simulation worker exactly one scenario from a fixed
//! dataset, records how the worker finished, and survives restarts by
//! reconciling the persisted allocation ledger at startup.

pub mod api;
pub mod config;
pub mod logging;
pub mod results;
pub mod state;
pub mod worker;
