//! Serialized operation queue for one shared connection.
//!
//! ```text
//! submit(op) ──► OperationStream (lazy)
//!                    │ first poll
//!                    ▼
//!            pending: [op3, op2] ──► in-flight slot: op1 ──► runtime task / driver thread
//!                    ▲                        │
//!                    └──── release (exactly once per op) ◄──┘
//! ```

mod operation;
mod operation_queue;
mod operation_stream;

pub use operation::{FnOperation, QueueOperation, operation_fn};
pub use operation_queue::OperationQueue;
pub use operation_stream::OperationStream;
