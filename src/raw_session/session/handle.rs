use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use crate::raw_session::common::error::{Result, SessionError};
use crate::raw_session::engine::{DecodeEngine, DefaultEngine};
use crate::raw_session::metadata::Metadata;
use crate::raw_session::session::{SessionConfig, SessionState};
use crate::raw_session::status::StatusCode;

/// One decode context and its lifecycle.
///
/// State-changing operations take `&mut self`, so at most one of them can be
/// in flight per session. Distinct sessions own distinct engines and may be
/// driven in parallel.
pub struct Session<E: DecodeEngine = DefaultEngine> {
    /// Shared only with the blocking task currently running an engine call.
    engine: Arc<Mutex<E>>,
    state: SessionState,
    config: SessionConfig,
}

impl Session<DefaultEngine> {
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Result<Self> {
        let engine = DefaultEngine::from_config(&config.rendition)?;
        Ok(Self::with_engine(engine, config))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "decode engine panicked".to_string()
    }
}

/// Paths cross into the engine as C strings.
fn validate_path<'a>(
    operation: &'static str,
    parameter: &'static str,
    path: &'a Path,
) -> Result<&'a Path> {
    match path.to_str() {
        Some(text) if !text.is_empty() && !text.contains('\0') => Ok(path),
        _ => Err(SessionError::invalid(operation, parameter, "a string")),
    }
}

impl<E: DecodeEngine> Session<E> {
    pub fn with_engine(engine: E, config: SessionConfig) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            state: SessionState::default(),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs `call` against the engine on the blocking pool.
    async fn access<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut E) -> T + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let span = tracing::debug_span!("engine_call", operation);

        let joined = tokio::task::spawn_blocking(move || {
            let _span = span.entered();
            let mut engine = engine
                .lock()
                .map_err(|_| SessionError::EnginePoisoned { operation })?;
            Ok::<T, SessionError>(call(&mut *engine))
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                warn!(operation, "Decode engine panicked: {}", message);
                Err(SessionError::Engine { operation, message })
            }
            Err(e) => Err(SessionError::Engine {
                operation,
                message: e.to_string(),
            }),
        }
    }

    fn out_of_order(&self, operation: &'static str) -> StatusCode {
        debug!(operation, "No source loaded");
        StatusCode::OUT_OF_ORDER_CALL
    }

    /// Loads a RAW file. `bigfile_size` falls back to the configured
    /// threshold and is passed to the engine unchanged.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), bigfile_size = ?bigfile_size))]
    pub async fn open_file(
        &mut self,
        path: impl AsRef<Path>,
        bigfile_size: Option<i64>,
    ) -> Result<StatusCode> {
        let path: PathBuf = validate_path("open_file", "filename", path.as_ref())?.to_path_buf();
        let threshold = bigfile_size.or(self.config.big_file_threshold);
        if threshold.is_some_and(|size| size < 0) {
            return Err(SessionError::invalid(
                "open_file",
                "bigfile_size",
                "a non-negative number",
            ));
        }

        self.state = SessionState::default();
        let status = self
            .access("open_file", move |engine| engine.open_file(&path, threshold))
            .await?;
        self.state.loaded = status.is_success();

        info!(status = status.code(), "open_file finished");
        Ok(status)
    }

    /// Loads an in-memory RAW source. The session takes its own copy.
    #[instrument(skip_all)]
    pub async fn open_buffer(&mut self, data: impl Into<Vec<u8>>) -> Result<StatusCode> {
        let data = data.into();
        if data.is_empty() {
            return Err(SessionError::MissingArgument {
                operation: "open_buffer",
                parameter: "buffer",
            });
        }

        let size = data.len();
        self.state = SessionState::default();
        let status = self
            .access("open_buffer", move |engine| engine.open_buffer(data))
            .await?;
        self.state.loaded = status.is_success();

        info!(size, status = status.code(), "open_buffer finished");
        Ok(status)
    }

    #[instrument(skip(self))]
    pub async fn unpack(&mut self) -> Result<StatusCode> {
        if !self.state.loaded {
            return Ok(self.out_of_order("unpack"));
        }
        let status = self.access("unpack", |engine| engine.unpack()).await?;
        self.state.raw_unpacked = status.is_success();
        Ok(status)
    }

    #[instrument(skip(self))]
    pub async fn unpack_thumb(&mut self) -> Result<StatusCode> {
        if !self.state.loaded {
            return Ok(self.out_of_order("unpack_thumb"));
        }
        let status = self.access("unpack_thumb", |engine| engine.unpack_thumb()).await?;
        self.state.thumbnail_unpacked = status.is_success();
        Ok(status)
    }

    /// Best-effort snapshot; empty groups are normal before a successful open.
    pub async fn metadata(&self) -> Result<Metadata> {
        self.access("metadata", |engine| engine.metadata()).await
    }

    pub async fn thumbnail(&self) -> Result<Vec<u8>> {
        if !self.state.thumbnail_unpacked {
            return Err(SessionError::ThumbnailUnavailable);
        }
        self.access("thumbnail", |engine| engine.thumbnail())
            .await?
            .ok_or(SessionError::ThumbnailUnavailable)
    }

    /// Embedded XMP packet, or an empty buffer if the source has none.
    pub async fn xmp(&self) -> Result<Vec<u8>> {
        Ok(self.access("xmp", |engine| engine.xmp()).await?.unwrap_or_default())
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn extract_tiff(&mut self, path: impl AsRef<Path>) -> Result<StatusCode> {
        let path: PathBuf = validate_path("extract_tiff", "tiffpath", path.as_ref())?.to_path_buf();
        if !self.state.loaded {
            return Ok(self.out_of_order("extract_tiff"));
        }

        let status = self
            .access("extract_tiff", move |engine| engine.extract_tiff(&path))
            .await?;
        if status.is_success() {
            self.state.raw_unpacked = true;
        }
        info!(status = status.code(), "extract_tiff finished");
        Ok(status)
    }

    pub async fn error_count(&self) -> Result<u32> {
        self.access("error_count", |engine| engine.error_count()).await
    }

    /// Releases everything tied to the loaded source and resets the session.
    ///
    /// Never fails. Also recovers a session whose engine panicked earlier.
    #[instrument(skip(self))]
    pub async fn recycle(&mut self) {
        self.state = SessionState::default();

        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || {
            engine
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recycle();
            engine.clear_poison();
        })
        .await;

        if let Err(e) = outcome {
            warn!("Engine recycle did not complete: {}", e);
        }
    }

    /// Closes only the input stream; decoded state stays readable.
    #[instrument(skip(self))]
    pub async fn recycle_datastream(&mut self) -> Result<()> {
        self.access("recycle_datastream", |engine| engine.recycle_datastream())
            .await
    }

    pub async fn camera_count(&self) -> Result<usize> {
        self.access("camera_count", |engine| engine.camera_count()).await
    }

    pub async fn camera_list(&self) -> Result<Vec<String>> {
        self.access("camera_list", |engine| engine.camera_list()).await
    }

    pub async fn strerror(&self, code: impl Into<StatusCode>) -> Result<String> {
        let code = code.into();
        self.access("strerror", move |engine| engine.strerror(code)).await
    }

    pub async fn version(&self) -> Result<String> {
        self.access("version", |engine| engine.version()).await
    }

    pub async fn version_number(&self) -> Result<u32> {
        self.access("version_number", |engine| engine.version_number()).await
    }
}
