mod tar;

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fieldpack_core::CancelToken;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub use tar::{decode_stream, encode_dir};

/// Encodes every file under `root` into a gzip-wrapped TAR stream.
pub fn encode_dir_compressed(
    root: &Path,
    writer: impl Write,
    cancel: &CancelToken,
) -> Result<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    encode_dir(root, &mut encoder, cancel)?;
    encoder.finish().context("failed to finish gzip stream")?;
    Ok(())
}

/// Encodes `root` into a `.tar.gz` file at `dest`.
pub fn encode_dir_to_file(root: &Path, dest: &Path, cancel: &CancelToken) -> Result<()> {
    let file = fs::File::create(dest)
        .with_context(|| format!("failed to create archive file {}", dest.display()))?;
    encode_dir_compressed(root, BufWriter::new(file), cancel)
        .with_context(|| format!("failed encoding {} into {}", root.display(), dest.display()))
}

/// Extracts a gzip-wrapped TAR stream into `dest_root`.
pub fn decode_compressed(
    reader: impl Read,
    dest_root: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    let mut decoder = GzDecoder::new(reader);
    decode_stream(&mut decoder, dest_root, cancel)
}

/// Extracts a `.tar.gz` file into `dest_root`.
pub fn decode_file(archive: &Path, dest_root: &Path, cancel: &CancelToken) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("failed to open archive file {}", archive.display()))?;
    decode_compressed(BufReader::new(file), dest_root, cancel)
        .with_context(|| format!("failed decoding {}", archive.display()))
}

#[cfg(test)]
mod tests;
