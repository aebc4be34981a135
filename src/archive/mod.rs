pub mod sevenzip;
pub mod tar;
pub mod zip;

#[cfg(feature = "rar")]
pub mod rar;

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::http::RangeStream;

/// Bytes read (and written) per copy iteration during extraction.
pub const COPY_CHUNK_SIZE: usize = 128 * 1024;

/// Longest signature in the table; dispatch probes exactly this many bytes.
const MAGIC_LEN: usize = 8;

/// Compression wrapper around a tar stream, chosen by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Xz,
    Bzip2,
    Zstd,
}

/// Container formats the dispatcher can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
    Tar(TarCompression),
}

impl ArchiveFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Rar => "RAR",
            ArchiveFormat::Tar(_) => "TAR",
        }
    }
}

/// Archive signature table, ordered; the first prefix match wins.
/// Matching is prefix-equality, so several entries may map to one format.
const SIGNATURES: &[(&[u8], ArchiveFormat)] = &[
    // zip (local file, empty archive, spanned archive)
    (b"PK\x03\x04", ArchiveFormat::Zip),
    (b"PK\x05\x06", ArchiveFormat::Zip),
    (b"PK\x07\x08", ArchiveFormat::Zip),
    // compressed tar wrappers; bare tar is probed separately since its
    // magic sits at offset 257, not 0
    (b"\x1f\x8b", ArchiveFormat::Tar(TarCompression::Gzip)),
    (b"\xfd7zXZ\x00", ArchiveFormat::Tar(TarCompression::Xz)),
    (b"BZh", ArchiveFormat::Tar(TarCompression::Bzip2)),
    (b"\x28\xb5\x2f\xfd", ArchiveFormat::Tar(TarCompression::Zstd)),
    // 7z
    (b"7z\xbc\xaf\x27\x1c", ArchiveFormat::SevenZip),
    // rar (>= 1.50 and >= 5.0)
    (b"Rar!\x1a\x07\x00", ArchiveFormat::Rar),
    (b"Rar!\x1a\x07\x01\x00", ArchiveFormat::Rar),
];

/// A single extractable file inside an archive. Directory entries are
/// filtered out before they ever reach a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path of the member inside the archive.
    pub path: PathBuf,
    /// Uncompressed size in bytes, as reported by the container.
    pub size: u64,
}

/// Uniform listing/extraction contract every format adapter satisfies.
///
/// An engine is bound to one stream at dispatch time and never switches
/// format afterwards. Listing is idempotent: the member table is built
/// once and cached for the engine's lifetime. Extraction streams bytes to
/// the destination in [`COPY_CHUNK_SIZE`] chunks and reports each chunk's
/// length (never a running total) to the progress callback.
pub trait ArchiveEngine {
    fn format(&self) -> ArchiveFormat;

    /// All non-directory members, in archive order.
    fn members(&mut self) -> Result<&[ArchiveMember]>;

    /// Sum of member sizes, for progress scaling.
    fn total_size(&mut self) -> Result<u64> {
        Ok(self.members()?.iter().map(|m| m.size).sum())
    }

    /// Stream one member's decompressed bytes to `dest`, creating parent
    /// directories as needed. Members may be extracted in any order; solid
    /// formats re-scan internally without the caller noticing.
    fn extract(
        &mut self,
        member: &Path,
        dest: &Path,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()>;
}

/// Match an 8-byte probe against the signature table.
fn match_signature(magic: &[u8]) -> Option<ArchiveFormat> {
    SIGNATURES
        .iter()
        .find(|(sig, _)| magic.starts_with(sig))
        .map(|(_, format)| *format)
}

/// Offset of the `ustar` magic inside a tar header block.
const TAR_MAGIC_OFFSET: u64 = 257;

/// Identify the archive format by its magic bytes.
///
/// Reads the first [`MAGIC_LEN`] bytes of the stream and rewinds it to
/// zero, so the selected decoder parses from the start. Bare tar carries
/// no magic at offset zero, so it gets a second probe at the `ustar`
/// field of the first header block. Unknown signatures fail with the
/// probed bytes rendered as hex for diagnostics.
pub fn detect_format(stream: &mut RangeStream) -> Result<ArchiveFormat> {
    stream.seek(SeekFrom::Start(0))?;
    let magic = read_up_to(stream, MAGIC_LEN)?;

    let format = match match_signature(&magic) {
        Some(format) => Some(format),
        None if stream.len() > TAR_MAGIC_OFFSET => {
            stream.seek(SeekFrom::Start(TAR_MAGIC_OFFSET))?;
            let ustar = read_up_to(stream, 5)?;
            (ustar == b"ustar").then_some(ArchiveFormat::Tar(TarCompression::None))
        }
        None => None,
    };

    stream.seek(SeekFrom::Start(0))?;

    format.ok_or_else(|| Error::unknown_format(&magic))
}

/// Read at most `len` bytes from the current position, stopping at EOF.
fn read_up_to(stream: &mut RangeStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Detect the format of `stream` and construct the matching engine.
///
/// The password is handed to the decoder unmodified; formats without
/// password support ignore it.
pub fn open_archive(
    mut stream: RangeStream,
    password: Option<&str>,
) -> Result<Box<dyn ArchiveEngine>> {
    let format = detect_format(&mut stream)?;

    match format {
        ArchiveFormat::Zip => Ok(Box::new(zip::ZipEngine::new(stream, password)?)),
        ArchiveFormat::SevenZip => Ok(Box::new(sevenzip::SevenZipEngine::new(stream, password)?)),
        ArchiveFormat::Tar(compression) => Ok(Box::new(tar::TarEngine::new(stream, compression))),
        #[cfg(feature = "rar")]
        ArchiveFormat::Rar => Ok(Box::new(rar::RarEngine::new(stream, password))),
        #[cfg(not(feature = "rar"))]
        ArchiveFormat::Rar => Err(Error::UnimplementedFormat { format: "RAR" }),
    }
}

/// Copy `reader` to `writer` in bounded chunks, reporting each chunk's
/// byte count to the callback. Never buffers more than one chunk.
pub(crate) fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut progress: Option<&mut dyn FnMut(u64)>,
) -> std::io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        writer.write_all(&chunk[..n])?;
        total += n as u64;
        if let Some(cb) = progress.as_mut() {
            cb(n as u64);
        }
    }

    Ok(total)
}

/// Create the parent directories of an extraction target.
pub(crate) fn ensure_parent_dir(dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_signature_zip() {
        assert_eq!(
            match_signature(&[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x00, 0x00]),
            Some(ArchiveFormat::Zip)
        );
        // Empty and spanned archive prefixes map to zip as well
        assert_eq!(
            match_signature(b"PK\x05\x06\x00\x00\x00\x00"),
            Some(ArchiveFormat::Zip)
        );
    }

    #[test]
    fn test_match_signature_sevenz_and_rar() {
        assert_eq!(
            match_signature(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04]),
            Some(ArchiveFormat::SevenZip)
        );
        assert_eq!(
            match_signature(&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00, 0x90]),
            Some(ArchiveFormat::Rar)
        );
        // RAR v5 signature
        assert_eq!(
            match_signature(&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00]),
            Some(ArchiveFormat::Rar)
        );
    }

    #[test]
    fn test_match_signature_tar_wrappers() {
        assert_eq!(
            match_signature(&[0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]),
            Some(ArchiveFormat::Tar(TarCompression::Gzip))
        );
        assert_eq!(
            match_signature(b"BZh91AY&"),
            Some(ArchiveFormat::Tar(TarCompression::Bzip2))
        );
        assert_eq!(
            match_signature(&[0xFD, b'7', b'z', b'X', b'Z', 0x00, 0x00, 0x00]),
            Some(ArchiveFormat::Tar(TarCompression::Xz))
        );
        assert_eq!(
            match_signature(&[0x28, 0xB5, 0x2F, 0xFD, 0x04, 0x00, 0x00, 0x00]),
            Some(ArchiveFormat::Tar(TarCompression::Zstd))
        );
    }

    #[test]
    fn test_match_signature_unknown() {
        assert_eq!(
            match_signature(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00, 0x00, 0x00]),
            None
        );
        assert_eq!(match_signature(&[]), None);
    }

    #[test]
    fn test_copy_with_progress_chunks() {
        let data = vec![0xABu8; COPY_CHUNK_SIZE + 100];
        let mut out = Vec::new();
        let mut increments = Vec::new();
        let mut cb = |n: u64| increments.push(n);

        let total = copy_with_progress(&mut data.as_slice(), &mut out, Some(&mut cb)).unwrap();

        assert_eq!(total, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(increments, vec![COPY_CHUNK_SIZE as u64, 100]);
    }

    #[test]
    fn test_copy_with_progress_empty_source() {
        let mut out = Vec::new();
        let mut calls = 0u32;
        let mut cb = |_: u64| calls += 1;

        let total = copy_with_progress(&mut (&[] as &[u8]), &mut out, Some(&mut cb)).unwrap();

        assert_eq!(total, 0);
        assert!(out.is_empty());
        assert_eq!(calls, 0);
    }
}
