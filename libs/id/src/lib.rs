//! # simalloc-id
//!
//! Typed identifiers for the scenario allocator.
//!
//! ## Kinds of identifier
//!
//! - **Keys** (`WorkerId`, `IterationId`) are supplied from outside the
//!   process: workers pick their own identity and iteration ids come from the
//!   scenario dataset. They are validated strings, never generated here.
//! - **Generated IDs** (`RequestId`) are minted by the service and use the
//!   prefixed ULID format `{prefix}_{ulid}`, e.g. `req_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//!
//! Keeping both behind distinct newtypes stops a worker id from ever being
//! used where an iteration id is expected.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::{validate_key, MAX_KEY_LEN};
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
