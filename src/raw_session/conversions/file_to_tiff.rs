use std::path::Path;

use tracing::{info, instrument};

use crate::raw_session::{
    common::error::Result,
    engine::DecodeEngine,
    session::Session,
    status::StatusCode,
};

async fn open_and_extract<E: DecodeEngine>(
    session: &mut Session<E>,
    input: &Path,
    output: &Path,
) -> Result<StatusCode> {
    let status = session.open_file(input, None).await?;
    if !status.is_success() {
        return Ok(status);
    }
    session.extract_tiff(output).await
}

/// Writes a TIFF rendition of `input` to `output` and recycles the session.
/// Returns the first non-success status, or success.
#[instrument(skip_all, fields(input = %input.as_ref().display(), output = %output.as_ref().display()))]
pub async fn convert_file_to_tiff<E: DecodeEngine>(
    session: &mut Session<E>,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<StatusCode> {
    let outcome = open_and_extract(session, input.as_ref(), output.as_ref()).await;
    session.recycle().await;

    if let Ok(status) = &outcome {
        info!(status = status.code(), "Conversion finished");
    }
    outcome
}
