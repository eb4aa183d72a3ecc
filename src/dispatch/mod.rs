//! Transition routing and delivery.

/// Handle resolution and notification forwarding.
pub mod dispatcher;
mod notification;
/// Ready/not-ready state machine.
pub mod state;

pub use dispatcher::{DispatchCounters, DispatchOutcome, Dispatcher};
pub use notification::TransitionNotification;
pub use state::{DispatchState, DispatchStateMachine, Routing};
