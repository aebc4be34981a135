use std::fs::File;
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Error, Result};
use crate::http::RangeStream;

use super::{ArchiveEngine, ArchiveFormat, ArchiveMember, copy_with_progress, ensure_parent_dir};

/// ZIP adapter over the `zip` crate.
///
/// The decoder reads the central directory through the stream at
/// construction; with the tail metadata region prefetched that usually
/// costs zero extra requests.
pub struct ZipEngine {
    archive: ZipArchive<RangeStream>,
    password: Option<Vec<u8>>,
    members: Option<Vec<ArchiveMember>>,
}

impl ZipEngine {
    pub fn new(stream: RangeStream, password: Option<&str>) -> Result<Self> {
        let archive = ZipArchive::new(stream).map_err(|e| map_zip_error(e, "<archive>"))?;

        Ok(ZipEngine {
            archive,
            password: password.map(|p| p.as_bytes().to_vec()),
            members: None,
        })
    }
}

impl ArchiveEngine for ZipEngine {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn members(&mut self) -> Result<&[ArchiveMember]> {
        if self.members.is_none() {
            let mut members = Vec::new();
            for i in 0..self.archive.len() {
                // Raw access skips decompression and password checks
                let entry = self
                    .archive
                    .by_index_raw(i)
                    .map_err(|e| map_zip_error(e, "<archive>"))?;
                if entry.is_dir() {
                    continue;
                }
                members.push(ArchiveMember {
                    path: PathBuf::from(entry.name()),
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
        let name = member.to_string_lossy();

        ensure_parent_dir(dest)?;

        let mut source = match &self.password {
            Some(password) => self
                .archive
                .by_name_decrypt(&name, password)
                .map_err(|e| map_zip_error(e, &name))?,
            None => self
                .archive
                .by_name(&name)
                .map_err(|e| map_zip_error(e, &name))?,
        };

        let mut target = File::create(dest)?;
        copy_with_progress(&mut source, &mut target, progress)?;

        Ok(())
    }
}

/// Map `zip` crate failures onto the crate taxonomy, keeping password
/// conditions distinct from generic corruption.
fn map_zip_error(err: ZipError, member: &str) -> Error {
    match err {
        ZipError::FileNotFound => Error::MemberNotFound {
            path: PathBuf::from(member),
        },
        ZipError::InvalidPassword => Error::WrongPassword {
            member: member.to_string(),
        },
        ZipError::UnsupportedArchive(msg) if msg.contains("Password required") => {
            Error::PasswordRequired {
                member: member.to_string(),
            }
        }
        ZipError::Io(e) => Error::Io(e),
        other => Error::BadArchive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_zip_error_member_not_found() {
        let err = map_zip_error(ZipError::FileNotFound, "missing.txt");
        assert!(matches!(err, Error::MemberNotFound { .. }));
    }

    #[test]
    fn test_map_zip_error_password_conditions() {
        let err = map_zip_error(ZipError::InvalidPassword, "secret.txt");
        assert!(matches!(err, Error::WrongPassword { .. }));

        let err = map_zip_error(
            ZipError::UnsupportedArchive("Password required to decrypt file"),
            "secret.txt",
        );
        assert!(matches!(err, Error::PasswordRequired { .. }));
    }

    #[test]
    fn test_map_zip_error_corruption() {
        let err = map_zip_error(
            ZipError::InvalidArchive("Could not find central directory end".into()),
            "<archive>",
        );
        assert!(matches!(err, Error::BadArchive(_)));
    }
}
