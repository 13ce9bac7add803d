/// Lifecycle flags tracked on the caller side of the engine boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Set by a successful `open_file`/`open_buffer`.
    pub loaded: bool,
    pub thumbnail_unpacked: bool,
    pub raw_unpacked: bool,
}
