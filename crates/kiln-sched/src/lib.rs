//! The sealing-pipeline task scheduler.
//!
//! Work enters through [`Scheduler::schedule`], carrying a
//! [`WorkerSelector`] strategy that decides which registered workers can
//! run it and which of those is preferred. The scheduler tracks each
//! worker's preparing/active resource windows, dispatches the prepare and
//! work actions, and delivers each call's [`CallResult`] to the request's
//! callback exactly once. Identical concurrent requests are coalesced by
//! [`WorkId`].

mod error;
mod resources;
mod scheduler;
mod selector;
#[cfg(test)]
mod test_support;
mod work;
mod worker;

pub use error::SchedulerError;
pub use resources::{resource_table, ActiveResources, TaskResources};
pub use scheduler::{ActionFuture, ReturnCallback, Scheduler, WorkerAction};
pub use selector::{AllocateSelector, ExistingSelector, TaskSelector, WorkerSelector};
pub use work::{WorkId, WorkState, WorkStatus, WorkTracker};
pub use worker::{Worker, WorkerHandle, WorkerReturn};
