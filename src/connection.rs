//! Connection lifecycle composition.
//!
//! A [`Connector`] turns a [`ConnectionSetup`] into a lazy
//! [`ConnectionLifecycle`] stream. Each attempt gets a freshly built
//! [`ConnectionGraph`] from the [`ConnectionComponentFactory`]:
//!
//! ```text
//! prepare_connection(setup)
//!     │ first poll
//!     ▼
//! capability check ──denied──► CapabilityDenied
//!     │
//!     ▼
//! factory.build(setup) ──► connect operation ──► OperationQueue
//!                          disconnect monitor ◄── hardware callbacks
//!                          disconnect action  ──► cleanup on termination
//! ```

mod component;
mod connector;
mod disconnect;
mod lifecycle;
mod lifecycle_state;
mod setup;

pub use component::{ConnectionComponentFactory, ConnectionGraph};
pub use connector::Connector;
pub use disconnect::{DisconnectAction, DisconnectMonitor, DisconnectNotifier, disconnect_channel};
pub use lifecycle::ConnectionLifecycle;
pub use lifecycle_state::{LifecycleEvent, LifecycleState, transition};
pub use setup::ConnectionSetup;
