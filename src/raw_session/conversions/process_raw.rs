use tracing::{info, instrument, warn};

use crate::raw_session::{
    common::error::Result,
    engine::DecodeEngine,
    metadata::Metadata,
    session::Session,
    status::StatusCode,
};

/// What `process_raw_image` collects from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub extract_thumbnail: bool,
    pub extract_metadata: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            extract_thumbnail: true,
            extract_metadata: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedRaw {
    /// First non-success status of the run, or success.
    pub status: StatusCode,
    pub thumbnail: Option<Vec<u8>>,
    pub metadata: Option<Metadata>,
}

async fn collect<E: DecodeEngine>(
    session: &mut Session<E>,
    data: Vec<u8>,
    options: ProcessOptions,
) -> Result<ProcessedRaw> {
    let mut processed = ProcessedRaw {
        status: session.open_buffer(data).await?,
        thumbnail: None,
        metadata: None,
    };
    if !processed.status.is_success() {
        warn!("Source rejected: {}", processed.status);
        return Ok(processed);
    }

    if options.extract_thumbnail {
        let status = session.unpack_thumb().await?;
        if status.is_success() {
            processed.thumbnail = Some(session.thumbnail().await?);
        } else {
            warn!("No thumbnail extracted: {}", status);
            processed.status = status;
        }
    }

    if options.extract_metadata {
        processed.metadata = Some(session.metadata().await?);
    }

    Ok(processed)
}

/// Opens `data`, pulls the thumbnail and metadata selected by `options`, then
/// recycles the session whatever the outcome.
#[instrument(skip_all, fields(input_size = tracing::field::Empty))]
pub async fn process_raw_image<E: DecodeEngine>(
    session: &mut Session<E>,
    data: impl Into<Vec<u8>>,
    options: ProcessOptions,
) -> Result<ProcessedRaw> {
    let data = data.into();
    tracing::Span::current().record("input_size", data.len());

    let outcome = collect(session, data, options).await;
    session.recycle().await;

    if let Ok(processed) = &outcome {
        info!(
            status = processed.status.code(),
            thumbnail = processed.thumbnail.as_ref().map_or(0, Vec::len),
            "RAW processing complete"
        );
    }
    outcome
}
