use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sevenz_rust::{Password, SevenZReader};

use crate::error::{Error, Result};
use crate::http::RangeStream;

use super::{ArchiveEngine, ArchiveFormat, ArchiveMember, copy_with_progress, ensure_parent_dir};

/// 7z adapter over `sevenz-rust`.
///
/// 7z is a solid format: member data is not independently seekable, so
/// every extraction rebuilds the reader and decodes from the start of the
/// stream, draining entries that precede the target. Callers see none of
/// this; they extract members in any order.
pub struct SevenZipEngine {
    stream: RangeStream,
    password: Option<String>,
    members: Vec<ArchiveMember>,
}

impl SevenZipEngine {
    pub fn new(mut stream: RangeStream, password: Option<&str>) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;

        // Validates the header (read from the tail metadata region in the
        // common case) and yields the entry table up front.
        let reader = SevenZReader::new(stream.clone(), stream.len(), make_password(password))
            .map_err(|e| map_sevenz_error(e, "<archive>"))?;

        let members = reader
            .archive()
            .files
            .iter()
            .filter(|entry| !entry.is_directory())
            .map(|entry| ArchiveMember {
                path: PathBuf::from(entry.name()),
                size: entry.size(),
            })
            .collect();

        Ok(SevenZipEngine {
            stream,
            password: password.map(String::from),
            members,
        })
    }
}

impl ArchiveEngine for SevenZipEngine {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn members(&mut self) -> Result<&[ArchiveMember]> {
        Ok(&self.members)
    }

    fn extract(
        &mut self,
        member: &Path,
        dest: &Path,
        mut progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        if !self.members.iter().any(|m| m.path == member) {
            return Err(Error::MemberNotFound {
                path: member.to_path_buf(),
            });
        }

        let name = member.to_string_lossy().into_owned();

        ensure_parent_dir(dest)?;

        // Fresh reader per extraction: solid decode state cannot be reused.
        self.stream.seek(SeekFrom::Start(0))?;
        let mut reader = SevenZReader::new(
            self.stream.clone(),
            self.stream.len(),
            make_password(self.password.as_deref()),
        )
        .map_err(|e| map_sevenz_error(e, &name))?;

        // I/O failures inside the closure are carried out through this
        // slot so they keep their own error type.
        let mut write_failure: Option<Error> = None;

        reader
            .for_each_entries(|entry, source| {
                if entry.is_directory() {
                    return Ok(true);
                }

                if entry.name() == name {
                    let mut target = match File::create(dest) {
                        Ok(f) => f,
                        Err(e) => {
                            write_failure = Some(e.into());
                            return Ok(false);
                        }
                    };
                    if let Err(e) = copy_with_progress(source, &mut target, progress.take()) {
                        write_failure = Some(e.into());
                    }
                    // Target handled; stop decoding the rest of the stream.
                    Ok(false)
                } else {
                    // Keep the solid stream advancing past earlier entries.
                    if let Err(e) = std::io::copy(source, &mut std::io::sink()) {
                        return Err(sevenz_rust::Error::other(format!("skipping entry: {e}")));
                    }
                    Ok(true)
                }
            })
            .map_err(|e| map_sevenz_error(e, &name))?;

        match write_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn make_password(password: Option<&str>) -> Password {
    match password {
        Some(p) => Password::from(p),
        None => Password::empty(),
    }
}

fn map_sevenz_error(err: sevenz_rust::Error, member: &str) -> Error {
    match err {
        sevenz_rust::Error::PasswordRequired => Error::PasswordRequired {
            member: member.to_string(),
        },
        sevenz_rust::Error::MaybeBadPassword(_) => Error::WrongPassword {
            member: member.to_string(),
        },
        other => Error::BadArchive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_sevenz_password_conditions() {
        let err = map_sevenz_error(sevenz_rust::Error::PasswordRequired, "a.txt");
        assert!(matches!(err, Error::PasswordRequired { .. }));

        let io = std::io::Error::other("decrypt failed");
        let err = map_sevenz_error(sevenz_rust::Error::MaybeBadPassword(io), "a.txt");
        assert!(matches!(err, Error::WrongPassword { .. }));
    }

    #[test]
    fn test_map_sevenz_corruption() {
        let err = map_sevenz_error(sevenz_rust::Error::other("bad header"), "<archive>");
        assert!(matches!(err, Error::BadArchive(_)));
    }
}
