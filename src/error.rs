use std::path::PathBuf;

/// Errors surfaced by the library.
///
/// Rate limiting (HTTP 429) is deliberately absent: the stream waits and
/// retries instead of failing. Password conditions are distinct from
/// `BadArchive` so callers can prompt rather than abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The initial size probe failed or the server answered with a status
    /// other than 200/206.
    #[error("failed to connect: server returned HTTP {status}")]
    Connect { status: u16 },

    /// A range fetch failed after exhausting the retry budget.
    #[error("transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// The server returned an empty body for a non-empty requested range.
    /// Retrying is unlikely to help, so this is surfaced immediately.
    #[error("server returned empty content for range {start}-{end}")]
    EmptyRange { start: u64, end: u64 },

    /// The first bytes of the resource match no known archive signature.
    #[error("unknown archive format with signature: {magic}")]
    UnknownFormat { magic: String },

    /// The signature is recognized but no engine is compiled in.
    #[error("{format} archives are not supported by this build")]
    UnimplementedFormat { format: &'static str },

    /// The decoder rejected the container as corrupt.
    #[error("bad archive: {0}")]
    BadArchive(String),

    /// A member is encrypted and no password was supplied.
    #[error("a password is required to extract {member}")]
    PasswordRequired { member: String },

    /// The supplied password does not decrypt the member.
    #[error("wrong password for {member}")]
    WrongPassword { member: String },

    /// Extraction was requested for a path absent from the listing.
    #[error("member not found in archive: {}", path.display())]
    MemberNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Render an 8-byte signature probe the way diagnostics expect it:
    /// uppercase hex, no separators.
    pub(crate) fn unknown_format(magic: &[u8]) -> Self {
        let hex: String = magic.iter().map(|b| format!("{b:02X}")).collect();
        Error::UnknownFormat { magic: hex }
    }
}
