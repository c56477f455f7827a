pub mod config;
pub mod error;
pub mod keys;
pub mod model;

pub use error::{Result, StoreError, TransformError, VerifyError};
pub use model::Uuid;
