pub mod config;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod models;
pub mod store;

pub use config::Config;
pub use dispatch::{CreatedEvent, DispatchOutcome, Dispatcher};
pub use error::{DispatchError, Result};
