//! Error types surfaced by the codec, the session and filesystem providers.

use std::{error, fmt, io};

/// The error type shared by every layer of the server.
///
/// The first group of variants is recoverable: a session reports them to
/// the client as an `RError` reply and keeps running. The remaining
/// variants are fatal at the session level and close the connection.
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure in the transport or the backing filesystem
    Io(io::Error),
    /// The named file does not exist
    DoesNotExist,
    /// The file or directory to be created already exists
    AlreadyExists,
    /// A directory could not be removed because it still has entries
    DirectoryNotEmpty,
    /// A message referenced a fid unknown to the session, or used a fid
    /// in a way the protocol does not allow
    InvalidFid,
    /// Authentication was requested; this server does not require any
    NoAuthRequired,
    /// A malformed or out-of-place wire message
    BadMessage,
    /// A message arrived that the version handshake does not permit
    UnexpectedMessage,
}

impl Error {
    /// The `RError` string for errors a session reports to the client.
    ///
    /// Returns `None` for the fatal kinds, which end the session instead
    /// of producing a reply.
    pub fn ename(&self) -> Option<&'static str> {
        match *self {
            Error::Io(_) => Some("i/o error"),
            Error::DoesNotExist => Some("file does not exist"),
            Error::AlreadyExists => Some("file or directory already exists"),
            Error::DirectoryNotEmpty => Some("directory is not empty"),
            Error::InvalidFid => Some("protocol botch"),
            Error::NoAuthRequired => Some("no authentication required"),
            Error::BadMessage | Error::UnexpectedMessage => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "i/o error: {}", e),
            Error::DoesNotExist => write!(f, "file does not exist"),
            Error::AlreadyExists => write!(f, "file or directory already exists"),
            Error::DirectoryNotEmpty => write!(f, "directory is not empty"),
            Error::InvalidFid => write!(f, "invalid fid"),
            Error::NoAuthRequired => write!(f, "no authentication required"),
            Error::BadMessage => write!(f, "bad message"),
            Error::UnexpectedMessage => write!(f, "expected different message type"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_have_enames() {
        assert_eq!(
            Error::Io(io::Error::other("boom")).ename(),
            Some("i/o error")
        );
        assert_eq!(Error::DoesNotExist.ename(), Some("file does not exist"));
        assert_eq!(Error::InvalidFid.ename(), Some("protocol botch"));
        assert_eq!(
            Error::AlreadyExists.ename(),
            Some("file or directory already exists")
        );
        assert_eq!(
            Error::DirectoryNotEmpty.ename(),
            Some("directory is not empty")
        );
        assert_eq!(
            Error::NoAuthRequired.ename(),
            Some("no authentication required")
        );
    }

    #[test]
    fn fatal_errors_have_no_ename() {
        assert_eq!(Error::BadMessage.ename(), None);
        assert_eq!(Error::UnexpectedMessage.ename(), None);
    }
}
