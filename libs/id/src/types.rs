//! Identifier definitions.

use crate::{define_id, define_key};

// =============================================================================
// Externally supplied keys
// =============================================================================

define_key!(WorkerId);
define_key!(IterationId);

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================
