//! Error types for sqlfs

use libc::c_int;
use thiserror::Error;

/// Result type for sqlfs operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Filesystem error types
///
/// The first group mirrors the POSIX conditions the kernel expects back from
/// a handler. Everything below it is an infrastructure failure and is
/// surfaced to the calling process as `EIO`.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("No such file or directory")]
    NotFound,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File exists")]
    AlreadyExists,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("File name too long")]
    NameTooLong,

    #[error("File too large")]
    FileTooLarge,

    #[error("Bad file descriptor: {0}")]
    BadDescriptor(u64),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// POSIX error number reported to the kernel for this error.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::BadDescriptor(_) => libc::EBADF,
            FsError::Sqlx(_)
            | FsError::Migration(_)
            | FsError::Connection(_)
            | FsError::Query(_)
            | FsError::Io(_) => libc::EIO,
        }
    }

    /// Whether this error comes from the storage layer rather than from the
    /// request itself.
    pub fn is_infrastructure(&self) -> bool {
        self.errno() == libc::EIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_their_errno() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidArgument("x".into()).errno(), libc::EINVAL);
        assert_eq!(FsError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(FsError::BadDescriptor(7).errno(), libc::EBADF);
        assert_eq!(FsError::FileTooLarge.errno(), libc::EFBIG);
        assert!(!FsError::NotFound.is_infrastructure());
    }

    #[test]
    fn test_storage_errors_map_to_eio() {
        let err = FsError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.errno(), libc::EIO);
        assert!(err.is_infrastructure());
        assert_eq!(FsError::Connection("refused".into()).errno(), libc::EIO);
        assert_eq!(
            FsError::from(std::io::Error::other("disk gone")).errno(),
            libc::EIO
        );
    }
}
