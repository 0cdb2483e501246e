pub mod handlers;
pub mod models;
mod service;

pub use models::Alarm;
pub use service::{AlarmsError, AlarmsService};
