use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};
use crate::http::RangeStream;

use super::{
    ArchiveEngine, ArchiveFormat, ArchiveMember, TarCompression, copy_with_progress,
    ensure_parent_dir,
};

/// Tar adapter over the `tar` crate, with the compression wrapper chosen
/// by the dispatcher from the magic bytes.
///
/// Compressed wrappers (gzip, xz, bzip2, zstd) are not seekable, so both
/// listing and extraction walk the archive sequentially from the start.
pub struct TarEngine {
    stream: RangeStream,
    compression: TarCompression,
    members: Option<Vec<ArchiveMember>>,
}

impl TarEngine {
    pub fn new(stream: RangeStream, compression: TarCompression) -> Self {
        TarEngine {
            stream,
            compression,
            members: None,
        }
    }

    /// Rewind the stream and wrap it in the right decompressor.
    fn open_reader(&mut self) -> Result<tar::Archive<Box<dyn Read>>> {
        let mut stream = self.stream.clone();
        stream.seek(SeekFrom::Start(0))?;

        let reader: Box<dyn Read> = match self.compression {
            TarCompression::None => Box::new(stream),
            TarCompression::Gzip => Box::new(flate2::read::GzDecoder::new(stream)),
            TarCompression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(stream)),
            TarCompression::Xz => Box::new(xz2::read::XzDecoder::new(stream)),
            TarCompression::Zstd => Box::new(
                zstd::stream::read::Decoder::new(stream)
                    .map_err(|e| Error::BadArchive(format!("zstd: {e}")))?,
            ),
        };

        Ok(tar::Archive::new(reader))
    }
}

impl ArchiveEngine for TarEngine {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar(self.compression)
    }

    fn members(&mut self) -> Result<&[ArchiveMember]> {
        if self.members.is_none() {
            let mut archive = self.open_reader()?;
            let mut members = Vec::new();

            for entry in archive
                .entries()
                .map_err(|e| Error::BadArchive(format!("tar: {e}")))?
            {
                let entry = entry.map_err(|e| Error::BadArchive(format!("tar: {e}")))?;
                if entry.header().entry_type().is_dir() {
                    continue;
                }
                let path = entry
                    .path()
                    .map_err(|e| Error::BadArchive(format!("tar: {e}")))?
                    .into_owned();
                members.push(ArchiveMember {
                    path,
                    size: entry.size(),
                });
            }

            self.members = Some(members);
        }

        Ok(self.members.as_deref().unwrap_or_default())
    }

    fn extract(
        &mut self,
        member: &Path,
        dest: &Path,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        let mut archive = self.open_reader()?;

        for entry in archive
            .entries()
            .map_err(|e| Error::BadArchive(format!("tar: {e}")))?
        {
            let mut entry = entry.map_err(|e| Error::BadArchive(format!("tar: {e}")))?;

            let path = entry
                .path()
                .map_err(|e| Error::BadArchive(format!("tar: {e}")))?
                .into_owned();

            if path == member {
                ensure_parent_dir(dest)?;
                let mut target = File::create(dest)?;
                copy_with_progress(&mut entry, &mut target, progress)?;
                return Ok(());
            }
        }

        Err(Error::MemberNotFound {
            path: member.to_path_buf(),
        })
    }
}
