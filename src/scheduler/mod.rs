mod core;

pub use core::{SchedulerCore, SchedulerError};
