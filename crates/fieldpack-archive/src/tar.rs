use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use fieldpack_core::CancelToken;

const BLOCK_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const COPY_CHUNK: usize = 8192;

// Fixed placeholder header values; clients never act on ownership.
const FILE_MODE: u32 = 0o644;
const OWNER_ID: u32 = 0;
const GROUP_ID: u32 = 0;

/// Writes every regular file under `root` as a USTAR record stream into
/// `writer`. Entries are emitted in sorted path order so the same tree
/// always encodes to the same stream (modulo mtimes).
pub fn encode_dir(root: &Path, writer: &mut impl Write, cancel: &CancelToken) -> Result<()> {
    for path in collect_files_sorted(root)? {
        cancel.checkpoint()?;
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("failed deriving archive path for {}", path.display()))?;
        append_file(&path, relative, writer, cancel)?;
    }

    // Two all-zero blocks terminate the stream.
    writer
        .write_all(&[0u8; BLOCK_SIZE * 2])
        .context("failed to write archive terminator")?;
    Ok(())
}

fn append_file(
    path: &Path,
    relative: &Path,
    writer: &mut impl Write,
    cancel: &CancelToken,
) -> Result<()> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to stat archive input {}", path.display()))?;
    let size = metadata.len();
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|stamp| stamp.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    let name = entry_name(relative);
    let header = build_header(&name, size, mtime)
        .with_context(|| format!("failed building archive header for {name}"))?;
    writer
        .write_all(&header)
        .with_context(|| format!("failed to write archive header for {name}"))?;

    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open archive input {}", path.display()))?;
    let mut written = 0u64;
    let mut chunk = [0u8; COPY_CHUNK];
    loop {
        cancel.checkpoint()?;
        let read = file
            .read(&mut chunk)
            .with_context(|| format!("failed reading archive input {}", path.display()))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&chunk[..read])
            .with_context(|| format!("failed streaming archive entry {name}"))?;
        written += read as u64;
    }
    if written != size {
        return Err(anyhow!(
            "archive input {} changed size while streaming: expected {size}, read {written}",
            path.display()
        ));
    }

    let padding = (BLOCK_SIZE - (size as usize % BLOCK_SIZE)) % BLOCK_SIZE;
    if padding > 0 {
        writer
            .write_all(&vec![0u8; padding])
            .with_context(|| format!("failed padding archive entry {name}"))?;
    }
    Ok(())
}

fn entry_name(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    // Long names are truncated to the classic 100-byte field.
    joined.chars().take(NAME_LEN).collect()
}

pub(crate) fn build_header(name: &str, size: u64, mtime: u64) -> Result<[u8; BLOCK_SIZE]> {
    let mut header = [0u8; BLOCK_SIZE];

    let name_bytes = name.as_bytes();
    let name_len = name_bytes.len().min(NAME_LEN);
    header[..name_len].copy_from_slice(&name_bytes[..name_len]);

    write_octal(&mut header[100..108], FILE_MODE as u64)?;
    write_octal(&mut header[108..116], OWNER_ID as u64)?;
    write_octal(&mut header[116..124], GROUP_ID as u64)?;
    write_octal(&mut header[124..136], size)?;
    write_octal(&mut header[136..148], mtime)?;

    // Checksum field counts as spaces while summing.
    header[148..156].fill(b' ');
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");

    let sum: u64 = header.iter().map(|byte| u64::from(*byte)).sum();
    let rendered = format!("{sum:06o}");
    header[148..154].copy_from_slice(rendered.as_bytes());
    header[154] = b' ';
    header[155] = 0;

    Ok(header)
}

/// Octal ASCII, zero padded, terminated with a single space. A value wider
/// than the field is an error, never a truncation.
fn write_octal(field: &mut [u8], value: u64) -> Result<()> {
    let width = field.len() - 1;
    let rendered = format!("{value:0width$o}");
    if rendered.len() > width {
        return Err(anyhow!(
            "value {value} does not fit a {width}-digit octal field"
        ));
    }
    field[..width].copy_from_slice(rendered.as_bytes());
    field[width] = b' ';
    Ok(())
}

fn collect_files_sorted(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(anyhow!(
            "archive input is not a directory: {}",
            root.display()
        ));
    }

    let mut files = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading archive input directory {}", dir.display()))?
        {
            entries.push(entry?);
        }
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Extracts a USTAR record stream into `dest_root`. Entries whose sanitized
/// path would escape `dest_root` are skipped, but their content and padding
/// are still consumed so the stream stays block aligned.
pub fn decode_stream(
    reader: &mut impl Read,
    dest_root: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    fs::create_dir_all(dest_root).with_context(|| {
        format!(
            "failed to create extraction directory {}",
            dest_root.display()
        )
    })?;

    let mut header = [0u8; BLOCK_SIZE];
    loop {
        cancel.checkpoint()?;
        if !read_block(reader, &mut header)? {
            break;
        }
        if header.iter().all(|byte| *byte == 0) {
            break;
        }

        let name = parse_name(&header);
        let size = parse_octal(&header[124..136])
            .with_context(|| format!("invalid size field in archive entry '{name}'"))?;
        let typeflag = header[156];
        let is_regular = typeflag == b'0' || typeflag == 0;

        let destination = if is_regular {
            sanitize_entry_path(&name).map(|relative| dest_root.join(relative))
        } else {
            None
        };

        match destination {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create {}", parent.display())
                    })?;
                }
                let mut file = fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                copy_entry_content(reader, Some(&mut file), size, cancel)
                    .with_context(|| format!("failed extracting archive entry '{name}'"))?;
            }
            None => {
                // Unsafe or non-regular entry: drain it and carry on.
                copy_entry_content(reader, None, size, cancel)
                    .with_context(|| format!("failed skipping archive entry '{name}'"))?;
            }
        }
    }

    Ok(())
}

fn read_block(reader: &mut impl Read, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let read = reader
            .read(&mut block[filled..])
            .context("failed reading archive block")?;
        if read == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(anyhow!("archive ended inside a block"));
        }
        filled += read;
    }
    Ok(true)
}

fn parse_name(header: &[u8; BLOCK_SIZE]) -> String {
    let raw = &header[..NAME_LEN];
    let end = raw.iter().position(|byte| *byte == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn parse_octal(field: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .context("non-ASCII octal field")?
        .trim_matches(|ch| ch == ' ' || ch == '\0');
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8).with_context(|| format!("invalid octal field '{text}'"))
}

/// Normalizes separators, strips leading separators, and rejects any path
/// that would resolve outside the extraction root.
fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let trimmed = normalized.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let candidate = PathBuf::from(trimmed);
    let mut safe = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            // ParentDir, RootDir, and prefixes all point outside the root.
            _ => return None,
        }
    }

    if safe.as_os_str().is_empty() {
        None
    } else {
        Some(safe)
    }
}

fn copy_entry_content(
    reader: &mut impl Read,
    mut sink: Option<&mut fs::File>,
    size: u64,
    cancel: &CancelToken,
) -> Result<()> {
    let mut remaining = size;
    let mut chunk = [0u8; COPY_CHUNK];
    while remaining > 0 {
        cancel.checkpoint()?;
        let want = chunk.len().min(remaining as usize);
        let read = reader
            .read(&mut chunk[..want])
            .context("failed reading archive content")?;
        if read == 0 {
            return Err(anyhow!("archive ended inside an entry"));
        }
        if let Some(file) = sink.as_deref_mut() {
            file.write_all(&chunk[..read])
                .context("failed writing extracted content")?;
        }
        remaining -= read as u64;
    }

    let padding = (BLOCK_SIZE - (size as usize % BLOCK_SIZE)) % BLOCK_SIZE;
    if padding > 0 {
        let mut pad = [0u8; BLOCK_SIZE];
        let mut left = padding;
        while left > 0 {
            let read = reader
                .read(&mut pad[..left])
                .context("failed reading archive padding")?;
            if read == 0 {
                return Err(anyhow!("archive ended inside entry padding"));
            }
            left -= read;
        }
    }
    Ok(())
}
