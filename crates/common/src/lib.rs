//! Common types for the free-token gate

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask_token};
