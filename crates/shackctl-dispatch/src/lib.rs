//! shackctl-dispatch: the per-device command dispatcher and poller.
//!
//! Every open device gets one [`Dispatcher`] task that owns its driver and
//! runs commands one at a time in arrival order, and optionally one
//! [`Poller`] task that keeps the published state fresh by submitting
//! queries through the same queue.

pub mod dispatcher;
pub mod poller;

pub use dispatcher::{Commander, DispatchConfig, Dispatcher};
pub use poller::{PollConfig, Poller, poll_queries};
