use std::path::PathBuf;

use anyhow::{Context, bail};
use rawsession_rs::logger;
use rawsession_rs::raw_session::Session;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let Some(input) = args.next() else {
        bail!("usage: rawsession_rs <raw-file> [tiff-out]");
    };
    let output = args.next();

    let mut session = Session::new().context("failed to create decode session")?;
    let engine = session.version().await?;
    let cameras = session.camera_count().await?;
    info!(%engine, cameras, "Decode session ready");

    let status = session.open_file(&input, None).await?;
    if !status.is_success() {
        error!("Cannot open {}: {}", input.display(), status);
        session.recycle().await;
        bail!("open_file failed with status {}", status.code());
    }

    let metadata = session.metadata().await?;
    info!(
        make = metadata.str_at("idata.make").unwrap_or("unknown"),
        model = metadata.str_at("idata.model").unwrap_or("unknown"),
        "Opened {}",
        input.display()
    );

    let status = session.unpack_thumb().await?;
    if status.is_success() {
        let thumbnail = session.thumbnail().await?;
        info!("Embedded thumbnail: {} bytes", thumbnail.len());
    } else {
        warn!("No thumbnail: {}", status);
    }

    let xmp = session.xmp().await?;
    if !xmp.is_empty() {
        info!("XMP packet: {} bytes", xmp.len());
    }

    if let Some(output) = output {
        let status = session.extract_tiff(&output).await?;
        if status.is_success() {
            info!("Wrote {}", output.display());
        } else {
            error!("TIFF extraction failed: {}", status);
        }
        let anomalies = session.error_count().await?;
        info!("Data anomalies during unpack: {}", anomalies);
    }

    session.recycle().await;
    Ok(())
}
