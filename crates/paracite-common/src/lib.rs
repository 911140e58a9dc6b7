//! paracite-common — Error taxonomy shared by every Paracite crate.

pub mod error;

pub use error::{PipelineError, Result, ServiceError};
