//! # sqlfs - a FUSE filesystem stored in SQL tables
//!
//! sqlfs exposes two relational tables as a POSIX-like directory tree:
//! `inodes` holds file content, `files` holds the names and parent links.
//! Each kernel request is translated into queries against those tables.
//!
//! ## Backends
//!
//! - **SQLite**: Embedded, single-file database (async via sqlx)
//! - **MySQL**: Remote database (async via sqlx)
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlfs::{FsConfig, Operations, SqlBackend, SqlFs, ROOT_INO};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SqlBackend::sqlite("sqlfs.db").await?;
//!     let fs = SqlFs::new(db, FsConfig::default());
//!
//!     let created = fs.create(ROOT_INO, "hello.txt", 0o644, libc::O_RDWR).await?;
//!     fs.write(created.fh, 0, b"world").await?;
//!     assert_eq!(fs.read(created.attr.ino, 0, 5).await?, b"world");
//!     fs.release(created.fh).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod directory;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod handles;
pub mod inode_store;
pub mod ops;
pub mod schema;

pub use backend::{SqlBackend, SqlBackendConfig};
pub use error::{FsError, Result};
pub use fs::{FsConfig, SqlFs};
pub use fuse::SqlFuse;
pub use ops::{Attributes, Created, DirEntry, FileKind, Operations, ReadDir, SetAttr};
pub use schema::ROOT_INO;
