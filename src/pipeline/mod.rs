// ============================================================================
// Pipeline Module
// ============================================================================
//
// The two long-running consume loops, parametrized by role and failure
// policy, plus the handler seam the hosting process plugs its processing
// into.
//
// ============================================================================

mod consume_loop;
mod handler;

pub use consume_loop::{ConsumeLoop, Discard, FailurePolicy, ForwardToRetry};
pub use handler::{LogOnlyHandler, MessageHandler};
