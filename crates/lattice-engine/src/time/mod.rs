//! Time subsystem.
//!
//! - `FrameClock` produces clamped per-frame deltas for the host loop.
//! - `Scheduler` is the cancelable one-shot timer abstraction the store uses
//!   for debounced persistence; `ManualScheduler` is driven by the host loop
//!   (or a test) through `advance`.

mod frame_clock;
mod scheduler;

pub use frame_clock::{FrameClock, FrameTime};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TaskHandle};
