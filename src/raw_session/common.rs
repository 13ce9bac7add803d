//! Common utilities module
//!
//! Error types shared by the session, the engines and the rendition writer.

pub mod error;

pub use error::{ConversionError, Result, SessionError};
