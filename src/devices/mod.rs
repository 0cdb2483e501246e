pub mod handlers;
pub mod models;
mod service;

pub use models::DeviceToken;
pub use service::{DeviceTokensError, DeviceTokensService};
