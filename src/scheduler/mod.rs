//! Rotation scheduling: which mode shows, for how long, and what preempts it.

mod controller;
mod duration;
mod mode;

pub use controller::{RotationScheduler, SchedulerCommand, SchedulerHandle};
pub use duration::DurationParams;
pub use mode::{
  Frame, LiveSignal, LiveSignalBoard, ModeCollaborator, ModeDescriptor, RotationSchedule,
  FALLBACK_MODE_ID,
};
