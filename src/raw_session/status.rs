//! LibRaw-style integer return codes.
//!
//! `0` is success, positive values are OS errors (errno), negative values are
//! engine-internal errors with fixed English descriptions.

use std::borrow::Cow;
use std::fmt;

/// Integer status returned by every decode engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(i32);

/// Coarse classification of a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    /// Positive code mirroring the platform errno.
    Os,
    /// Negative code from the engine's own error list.
    Engine,
}

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const UNSPECIFIED_ERROR: Self = Self(-1);
    pub const FILE_UNSUPPORTED: Self = Self(-2);
    pub const REQUEST_FOR_NONEXISTENT_IMAGE: Self = Self(-3);
    pub const OUT_OF_ORDER_CALL: Self = Self(-4);
    pub const NO_THUMBNAIL: Self = Self(-5);
    pub const UNSUPPORTED_THUMBNAIL: Self = Self(-6);
    pub const INPUT_CLOSED: Self = Self(-7);
    pub const NOT_IMPLEMENTED: Self = Self(-8);
    pub const INSUFFICIENT_MEMORY: Self = Self(-100007);
    pub const DATA_ERROR: Self = Self(-100008);
    pub const IO_ERROR: Self = Self(-100009);
    pub const CANCELLED_BY_CALLBACK: Self = Self(-100010);
    pub const BAD_CROP: Self = Self(-100011);
    pub const TOO_BIG: Self = Self(-100012);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn kind(self) -> StatusKind {
        match self.0 {
            0 => StatusKind::Success,
            c if c > 0 => StatusKind::Os,
            _ => StatusKind::Engine,
        }
    }

    /// Fixed English description of the code, as `strerror(3)` would give it.
    pub fn description(self) -> Cow<'static, str> {
        let text = match self {
            Self::SUCCESS => "No error",
            Self::UNSPECIFIED_ERROR => "Unspecified error",
            Self::FILE_UNSUPPORTED => "Unsupported file format or not RAW file",
            Self::REQUEST_FOR_NONEXISTENT_IMAGE => "Request for nonexisting image number",
            Self::OUT_OF_ORDER_CALL => "Out of order call of libraw function",
            Self::NO_THUMBNAIL => "No thumbnail in file",
            Self::UNSUPPORTED_THUMBNAIL => "Unsupported thumbnail format",
            Self::INPUT_CLOSED => "No input stream, or input stream closed",
            Self::NOT_IMPLEMENTED => "Decoder not implemented for this data format",
            Self::INSUFFICIENT_MEMORY => "Unsufficient memory",
            Self::DATA_ERROR => "Corrupted data or unexpected EOF",
            Self::IO_ERROR => "Input/output error",
            Self::CANCELLED_BY_CALLBACK => "Cancelled by user callback",
            Self::BAD_CROP => "Bad crop box",
            Self::TOO_BIG => "Image too big for processing",
            Self(code) if code > 0 => return Cow::Owned(os_error_text(code)),
            _ => "Unknown error code",
        };
        Cow::Borrowed(text)
    }
}

/// `std::io::Error`'s display appends " (os error N)"; strerror does not.
fn os_error_text(code: i32) -> String {
    let text = std::io::Error::from_raw_os_error(code).to_string();
    match text.rfind(" (os error ") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}

/// Maps a status code to its fixed English description.
pub fn strerror(code: i32) -> String {
    StatusCode::new(code).description().into_owned()
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for i32 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

impl From<&std::io::Error> for StatusCode {
    fn from(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) if errno > 0 => Self(errno),
            _ => Self::IO_ERROR,
        }
    }
}

impl From<std::io::Error> for StatusCode {
    fn from(err: std::io::Error) -> Self {
        Self::from(&err)
    }
}

impl PartialEq<i32> for StatusCode {
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_description() {
        assert_eq!(strerror(-4), "Out of order call of libraw function");
        assert_eq!(StatusCode::OUT_OF_ORDER_CALL, -4);
    }

    #[test]
    fn test_kind_follows_sign() {
        assert_eq!(StatusCode::SUCCESS.kind(), StatusKind::Success);
        assert_eq!(StatusCode::new(2).kind(), StatusKind::Os);
        assert_eq!(StatusCode::DATA_ERROR.kind(), StatusKind::Engine);
    }

    #[test]
    fn test_unknown_negative_code() {
        assert_eq!(strerror(-42), "Unknown error code");
    }

    #[test]
    fn test_positive_code_uses_os_text() {
        let text = strerror(2);
        assert!(!text.is_empty());
        assert!(!text.contains("os error"));
    }

    #[test]
    fn test_io_error_maps_to_errno() {
        let err = std::io::Error::from_raw_os_error(13);
        assert_eq!(StatusCode::from(&err), 13);

        let err = std::io::Error::new(std::io::ErrorKind::Other, "synthetic");
        assert_eq!(StatusCode::from(err), StatusCode::IO_ERROR);
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            StatusCode::NO_THUMBNAIL.to_string(),
            "No thumbnail in file (-5)"
        );
    }
}
