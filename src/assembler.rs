//! Output naming and ordered reassembly of worker segments.

use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt, BufReader, BufWriter},
};

use crate::{
    COPY_BUFFER_SIZE, Error, Result,
    models::DownloadConfig,
    url_ref::UrlRef,
    utils::{generated_filename, sanitize_filename},
    wire::ResponseHead,
    worker::Segment,
};

/// Picks the output file name.
///
/// Precedence: explicit name, `content-disposition`, the URL, then a generated name.
pub fn resolve_file_name(explicit: Option<&str>, head: &ResponseHead, url: &UrlRef) -> String {
    explicit
        .and_then(sanitize_filename)
        .or_else(|| head.suggested_filename().as_deref().and_then(sanitize_filename))
        .or_else(|| url.file_name().as_deref().and_then(sanitize_filename))
        .unwrap_or_else(|| generated_filename(head.content_type()))
}

/// Resolves the full output path, creating the output directory when needed.
pub async fn resolve_destination(
    config: &DownloadConfig,
    head: &ResponseHead,
    url: &UrlRef,
) -> Result<PathBuf> {
    let name = resolve_file_name(config.filename.as_deref(), head, url);

    match &config.output_dir {
        Some(dir) => {
            fs::create_dir_all(dir).await.map_err(|err| Error::write(dir, err))?;
            Ok(dir.join(name))
        }
        None => Ok(PathBuf::from(name)),
    }
}

#[derive(Debug, Clone)]
pub struct Assembler {
    destination: PathBuf,
}

impl Assembler {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    #[inline]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Concatenates `segments` in range order into the destination and returns the bytes written.
    ///
    /// Data is staged in a temporary file next to the destination and only moved into place
    /// once every segment has been copied, so a failure never leaves a partial output file.
    pub async fn assemble(&self, mut segments: Vec<Segment>) -> Result<u64> {
        segments.sort_by_key(|segment| (segment.range.map(|range| range.start), segment.index));

        let write_error = |err| Error::write(&self.destination, err);

        let parent = match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".fetchline-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(write_error)?;
        let (file, staging_path) = staging.into_parts();

        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, File::from_std(file));
        let mut written = 0u64;

        for segment in segments {
            let index = segment.index;
            let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, segment.into_scratch());
            let copied = io::copy_buf(&mut reader, &mut writer).await.map_err(write_error)?;
            tracing::trace!("Segment {index}: {copied} bytes appended");
            written += copied;
        }

        writer.flush().await.map_err(write_error)?;
        let file = writer.into_inner();
        file.sync_all().await.map_err(write_error)?;
        drop(file);

        staging_path
            .persist(&self.destination)
            .map_err(|err| write_error(err.error))?;

        tracing::debug!("Assembled {written} bytes into `{}`", self.destination.display());
        Ok(written)
    }
}
