pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use application::client::{ClientConfig, EbicsClient};
pub use error::{EbicsError, Result};
