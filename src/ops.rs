//! The VFS operation surface
//!
//! [`Operations`] has one method per request the kernel dispatch layer can
//! deliver. The set is closed; `SqlFs` is its only implementation and the
//! FUSE bridge calls it directly.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::{
    error::Result,
    schema::{mode, BLOCK_SIZE},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
}

impl FileKind {
    /// `S_IFMT` bits for this kind
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::Directory => mode::S_IFDIR,
            FileKind::RegularFile => mode::S_IFREG,
        }
    }
}

/// Synthesized attribute record for one inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub ino: u64,
    pub size: u64,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attributes {
    /// Full `st_mode`: type bits plus permission bits
    pub fn mode(&self) -> u32 {
        self.kind.type_bits() | u32::from(self.perm)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Number of 512-byte blocks covering `size`
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(u64::from(BLOCK_SIZE))
    }
}

/// One item of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: Attributes,
    /// Cursor that resumes the listing right after this entry
    pub next_cursor: u64,
}

/// Finite listing of the entries after a cursor, in cursor order
#[derive(Debug, Default)]
pub struct ReadDir {
    entries: std::vec::IntoIter<DirEntry>,
}

impl ReadDir {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for ReadDir {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// Attribute changes requested by `setattr`. `None` leaves a field alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// Result of `create`: the new inode's attributes and an open handle on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub attr: Attributes,
    pub fh: u64,
}

/// Request handlers invoked by the kernel dispatch layer
#[async_trait]
pub trait Operations: Send + Sync {
    /// Attributes of `ino`. The root is synthesized without touching storage.
    async fn getattr(&self, ino: u64) -> Result<Attributes>;

    /// Resolve `name` inside `parent`, including `.` and `..`.
    async fn lookup(&self, parent: u64, name: &str) -> Result<Attributes>;

    /// Entries of `ino` after `cursor`; `0` starts from the beginning.
    async fn readdir(&self, ino: u64, cursor: u64) -> Result<ReadDir>;

    async fn opendir(&self, ino: u64) -> Result<u64>;

    async fn releasedir(&self, fh: u64) -> Result<()>;

    /// Always granted; there is no permission model.
    async fn access(&self, ino: u64, mask: i32) -> Result<()>;

    async fn open(&self, ino: u64, flags: i32) -> Result<u64>;

    async fn create(&self, parent: u64, name: &str, mode: u32, flags: i32) -> Result<Created>;

    /// Bytes `[offset, offset + size)` of `ino`, clipped to its length.
    async fn read(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset` through handle `fh`; returns bytes accepted.
    async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32>;

    async fn release(&self, fh: u64) -> Result<()>;

    async fn setattr(&self, ino: u64, changes: SetAttr, fh: Option<u64>) -> Result<Attributes>;

    async fn unlink(&self, parent: u64, name: &str) -> Result<()>;
}
