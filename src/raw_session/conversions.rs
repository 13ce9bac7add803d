//! One-shot conversions
//!
//! Each helper drives a whole open → extract → recycle cycle on a session and
//! recycles it on every exit path.

mod process_raw;
mod file_to_tiff;


pub use process_raw::{ProcessOptions, ProcessedRaw, process_raw_image};
pub use file_to_tiff::convert_file_to_tiff;
