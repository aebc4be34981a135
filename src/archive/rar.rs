use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use unrar::Archive;
use unrar::error::{Code, UnrarError};

use crate::error::{Error, Result};
use crate::http::RangeStream;

use super::{ArchiveEngine, ArchiveFormat, ArchiveMember, ensure_parent_dir};

/// RAR adapter over the `unrar` crate (libunrar bindings).
///
/// libunrar only opens filesystem paths, so the remote stream is spooled
/// to a temp file once, lazily, and all listing/extraction runs against
/// that copy. The spool file is removed when the engine drops.
pub struct RarEngine {
    stream: RangeStream,
    password: Option<String>,
    spool: Option<tempfile::TempPath>,
    members: Option<Vec<ArchiveMember>>,
}

impl RarEngine {
    pub fn new(stream: RangeStream, password: Option<&str>) -> Self {
        RarEngine {
            stream,
            password: password.map(String::from),
            spool: None,
            members: None,
        }
    }

    fn spool_path(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.spool {
            return Ok(path.to_path_buf());
        }

        let mut file = tempfile::Builder::new()
            .prefix("rextract-")
            .suffix(".rar")
            .tempfile()?;

        self.stream.seek(SeekFrom::Start(0))?;
        std::io::copy(&mut self.stream, file.as_file_mut())?;

        let temp = file.into_temp_path();
        let path = temp.to_path_buf();
        self.spool = Some(temp);
        Ok(path)
    }
}

/// Build an `Archive` handle; `unrar` borrows both path and password.
fn rar_archive<'a>(path: &'a Path, password: Option<&'a str>) -> Archive<'a> {
    match password {
        Some(p) => Archive::with_password(path, p),
        None => Archive::new(path),
    }
}

impl ArchiveEngine for RarEngine {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn members(&mut self) -> Result<&[ArchiveMember]> {
        if self.members.is_none() {
            let path = self.spool_path()?;
            let password = self.password.clone();
            let archive = rar_archive(&path, password.as_deref())
                .open_for_listing()
                .map_err(|e| map_unrar_error(e, "<archive>"))?;

            let mut members = Vec::new();
            for header in archive {
                let header = header.map_err(|e| map_unrar_error(e, "<archive>"))?;
                if header.is_directory() {
                    continue;
                }
                members.push(ArchiveMember {
                    path: header.filename.clone(),
                    size: header.unpacked_size,
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
        let name = member.to_string_lossy().into_owned();

        ensure_parent_dir(dest)?;

        let path = self.spool_path()?;
        let password = self.password.clone();
        let mut archive = rar_archive(&path, password.as_deref())
            .open_for_processing()
            .map_err(|e| map_unrar_error(e, &name))?;

        loop {
            let header = match archive
                .read_header()
                .map_err(|e| map_unrar_error(e, &name))?
            {
                Some(header) => header,
                None => break,
            };

            if header.entry().filename == member && !header.entry().is_directory() {
                let size = header.entry().unpacked_size;
                header
                    .extract_to(dest)
                    .map_err(|e| map_unrar_error(e, &name))?;
                // libunrar writes the file itself, so there is no chunk
                // boundary to observe; report the member in one increment.
                if let Some(cb) = progress {
                    cb(size);
                }
                return Ok(());
            }

            archive = header.skip().map_err(|e| map_unrar_error(e, &name))?;
        }

        Err(Error::MemberNotFound {
            path: member.to_path_buf(),
        })
    }
}

fn map_unrar_error(err: UnrarError, member: &str) -> Error {
    match err.code {
        Code::MissingPassword => Error::PasswordRequired {
            member: member.to_string(),
        },
        Code::BadPassword => Error::WrongPassword {
            member: member.to_string(),
        },
        _ => Error::BadArchive(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unrar::error::When;

    #[test]
    fn test_map_unrar_password_conditions() {
        let err = map_unrar_error(
            UnrarError {
                code: Code::MissingPassword,
                when: When::Read,
            },
            "a.txt",
        );
        assert!(matches!(err, Error::PasswordRequired { .. }));

        let err = map_unrar_error(
            UnrarError {
                code: Code::BadPassword,
                when: When::Process,
            },
            "a.txt",
        );
        assert!(matches!(err, Error::WrongPassword { .. }));
    }

    #[test]
    fn test_map_unrar_corruption() {
        let err = map_unrar_error(
            UnrarError {
                code: Code::BadData,
                when: When::Process,
            },
            "a.txt",
        );
        assert!(matches!(err, Error::BadArchive(_)));
    }
}
