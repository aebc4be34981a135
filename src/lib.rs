//! Inspect and extract members of remote archives over HTTP range requests.
//!
//! A [`RangeStream`] presents a URL as a lazily fetched, seekable file;
//! [`open_archive`] sniffs the container format from its magic bytes and
//! returns the matching [`ArchiveEngine`], which lists members and streams
//! individual files to disk without ever downloading the whole archive.

pub mod archive;
pub mod error;
pub mod http;

pub use archive::{
    ArchiveEngine, ArchiveFormat, ArchiveMember, TarCompression, detect_format, open_archive,
};
pub use error::{Error, Result};
pub use http::{RangeStream, StreamConfig, TransferMetrics};
