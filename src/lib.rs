//! Asynchronous session layer over a RAW-image decode engine.
//!
//! A [`raw_session::Session`] owns one decode handle and exposes the
//! open → unpack → extract → recycle lifecycle as `async` calls. The engine
//! itself is either LibRaw (feature `libraw`) or a pure-Rust engine built on
//! `rawloader`.

// LibRaw's metadata groups are large `json!` literals.
#![recursion_limit = "256"]

pub mod logger;
pub mod raw_session;
