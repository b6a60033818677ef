//! Emitters used by queued operations to deliver results.
//!
//! An operation never talks to its consumer directly. It receives a
//! [`QueueReleasingEmitter`], which forwards values to the consumer-facing
//! [`Emitter`] and frees the queue slot exactly once, whichever of
//! completion, error, cancellation, or drop comes first.
//!
//! ```text
//!  operation ──► QueueReleasingEmitter ──► Emitter ──► EmissionReceiver ──► consumer
//!                        │                    ▲                 │
//!                        └── QueueRelease     └── cancel hook ◄─┘ (drop before terminal)
//! ```

mod channel;
mod releasing;

pub use channel::{EmissionReceiver, Emitter, emission_channel};
pub use releasing::{QueueRelease, QueueReleasingEmitter};
