//! Filesystem adapter: VFS operations over the `inodes` and `files` tables

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rustix::process::{getgid, getuid};
use sqlx::AnyConnection;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    backend::SqlBackend,
    directory::DirectoryIndex,
    error::Result,
    handles::DescriptorTable,
    inode_store::InodeStore,
    ops::{Attributes, Created, DirEntry, FileKind, Operations, ReadDir, SetAttr},
    schema::{mode, DIR_SIZE, MAX_FILE_SIZE, MAX_NAME_LEN, ROOT_INO},
    FsError,
};

/// Settings for attribute synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// Owner reported for every inode
    pub uid: u32,
    pub gid: u32,
    /// How long the kernel may cache attributes and entries
    pub ttl: Duration,
}

impl Default for FsConfig {
    /// Owner is the identity of the running process.
    fn default() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            ttl: Duration::from_secs(1),
        }
    }
}

/// Filesystem backed by a SQL database
///
/// Every request runs its statements on one pooled connection, or on one
/// transaction when it mutates both tables. There is no caching: each call
/// sees whatever the database holds at that moment.
pub struct SqlFs {
    backend: SqlBackend,
    config: FsConfig,
    inodes: InodeStore,
    entries: DirectoryIndex,
    handles: Mutex<DescriptorTable>,
}

impl SqlFs {
    pub fn new(backend: SqlBackend, config: FsConfig) -> Self {
        Self {
            backend,
            config,
            inodes: InodeStore,
            entries: DirectoryIndex,
            handles: Mutex::new(DescriptorTable::new()),
        }
    }

    pub fn backend(&self) -> &SqlBackend {
        &self.backend
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Live handles on `ino`.
    pub async fn open_count(&self, ino: u64) -> usize {
        self.handles.lock().await.open_count(ino)
    }

    fn synthesize(&self, ino: u64, kind: FileKind, size: u64) -> Attributes {
        let (perm, nlink) = match kind {
            FileKind::Directory => (mode::DEFAULT_DIR_PERM, 2),
            FileKind::RegularFile => (mode::DEFAULT_FILE_PERM, 1),
        };
        Attributes {
            ino,
            size,
            kind,
            perm,
            nlink,
            uid: self.config.uid,
            gid: self.config.gid,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }

    /// Attributes of `ino` as seen through `conn`.
    ///
    /// Stored inodes are regular files. An id without a row is a directory
    /// when the hierarchy mentions it; otherwise it does not exist.
    async fn attributes(&self, conn: &mut AnyConnection, ino: u64) -> Result<Attributes> {
        if ino == ROOT_INO {
            return Ok(self.synthesize(ino, FileKind::Directory, DIR_SIZE));
        }
        if let Some(content) = self.inodes.get(conn, ino).await? {
            return Ok(self.synthesize(ino, FileKind::RegularFile, content.len() as u64));
        }
        if self.entries.is_linked(conn, ino).await? {
            return Ok(self.synthesize(ino, FileKind::Directory, DIR_SIZE));
        }
        Err(FsError::NotFound)
    }

    async fn connection(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Any>> {
        Ok(self.backend.pool().acquire().await?)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidArgument(format!("bad entry name {name:?}")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Check that content of `len` bytes fits in a file, as a `usize`.
fn file_len(len: u64) -> Result<usize> {
    if len > MAX_FILE_SIZE {
        return Err(FsError::FileTooLarge);
    }
    usize::try_from(len).map_err(|_| FsError::FileTooLarge)
}

/// `content[offset..offset + size]`, clipped to the content length.
pub fn read_range(content: &[u8], offset: u64, size: u32) -> &[u8] {
    let len = content.len() as u64;
    let start = offset.min(len);
    let end = offset.saturating_add(u64::from(size)).min(len);
    &content[start as usize..end as usize]
}

/// Overlay `data` onto `content` at `offset`.
///
/// Bytes past the end of `data` are kept; a gap between the old end and
/// `offset` is filled with zeroes. `offset + data.len()` must not overflow;
/// `write` bounds it by `MAX_FILE_SIZE` first.
pub fn splice(mut content: Vec<u8>, offset: usize, data: &[u8]) -> Vec<u8> {
    let end = offset + data.len();
    if content.len() < end {
        content.resize(end, 0);
    }
    content[offset..end].copy_from_slice(data);
    content
}

#[async_trait]
impl Operations for SqlFs {
    async fn getattr(&self, ino: u64) -> Result<Attributes> {
        debug!(ino, "getattr");
        if ino == ROOT_INO {
            return Ok(self.synthesize(ino, FileKind::Directory, DIR_SIZE));
        }
        let mut conn = self.connection().await?;
        self.attributes(&mut conn, ino).await
    }

    async fn lookup(&self, parent: u64, name: &str) -> Result<Attributes> {
        debug!(parent, name, "lookup");
        let mut conn = self.connection().await?;

        match name {
            "." => self.attributes(&mut conn, parent).await,
            ".." if parent == ROOT_INO => self.attributes(&mut conn, ROOT_INO).await,
            ".." => {
                let grandparent = self
                    .entries
                    .parent_of(&mut conn, parent)
                    .await?
                    .ok_or(FsError::NotFound)?;
                self.attributes(&mut conn, grandparent).await
            }
            _ => {
                if name.len() > MAX_NAME_LEN {
                    return Err(FsError::NameTooLong);
                }
                let entry = self
                    .entries
                    .lookup(&mut conn, parent, name)
                    .await?
                    .ok_or(FsError::NotFound)?;
                self.attributes(&mut conn, entry.inode).await
            }
        }
    }

    async fn readdir(&self, ino: u64, cursor: u64) -> Result<ReadDir> {
        debug!(ino, cursor, "readdir");
        let mut conn = self.connection().await?;

        match self.attributes(&mut conn, ino).await {
            Ok(attr) if !attr.is_dir() => return Err(FsError::NotADirectory),
            Ok(_) | Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let children = self.entries.children_after(&mut conn, ino, cursor).await?;
        let mut listing = Vec::with_capacity(children.len());
        for entry in children {
            let attr = self.attributes(&mut conn, entry.inode).await?;
            listing.push(DirEntry {
                name: entry.name,
                attr,
                next_cursor: entry.sequence_id,
            });
        }
        Ok(ReadDir::new(listing))
    }

    async fn opendir(&self, ino: u64) -> Result<u64> {
        debug!(ino, "opendir");
        let attr = self.getattr(ino).await?;
        if !attr.is_dir() {
            return Err(FsError::NotADirectory);
        }
        // Directories carry no per-handle state; the handle is the inode id
        Ok(ino)
    }

    async fn releasedir(&self, fh: u64) -> Result<()> {
        debug!(fh, "releasedir");
        Ok(())
    }

    async fn access(&self, ino: u64, mask: i32) -> Result<()> {
        debug!(ino, mask, "access");
        Ok(())
    }

    async fn open(&self, ino: u64, flags: i32) -> Result<u64> {
        debug!(ino, flags, "open");
        // Held across the existence check so `unlink` sees this handle
        // before it decides whether to drop the content
        let mut handles = self.handles.lock().await;
        let mut conn = self.connection().await?;
        let attr = self.attributes(&mut conn, ino).await?;

        let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;
        if attr.is_dir() && writable {
            return Err(FsError::IsADirectory);
        }
        if !attr.is_dir() && writable && flags & libc::O_TRUNC != 0 {
            self.inodes.put(&mut conn, ino, &[]).await?;
        }

        let fh = handles.open(ino, flags);
        debug!(ino, fh, "opened");
        Ok(fh)
    }

    async fn create(&self, parent: u64, name: &str, mode: u32, flags: i32) -> Result<Created> {
        debug!(parent, name, mode, flags, "create");
        check_name(name)?;

        // Both inserts commit together or not at all; dropping `tx` on an
        // early return rolls it back.
        let mut tx = self.backend.begin().await?;

        match self.attributes(&mut tx, parent).await {
            Ok(attr) if attr.is_dir() => {}
            Ok(_) => {
                return Err(FsError::InvalidArgument(format!(
                    "parent {parent} is not a directory"
                )));
            }
            Err(FsError::NotFound) => {
                return Err(FsError::InvalidArgument(format!(
                    "parent {parent} does not exist"
                )));
            }
            Err(e) => return Err(e),
        }

        if self.entries.lookup(&mut tx, parent, name).await?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let ino = self.inodes.insert(&mut tx, &[]).await?;
        self.entries.insert(&mut tx, name, ino, parent).await?;
        tx.commit().await?;

        let attr = self.synthesize(ino, FileKind::RegularFile, 0);
        let fh = self.handles.lock().await.open(ino, flags);
        debug!(parent, name, ino, fh, "created");
        Ok(Created { attr, fh })
    }

    async fn read(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>> {
        debug!(ino, offset, size, "read");
        let mut conn = self.connection().await?;

        // A missing inode reads as empty rather than failing
        let content = self.inodes.get(&mut conn, ino).await?.unwrap_or_default();
        Ok(read_range(&content, offset, size).to_vec())
    }

    async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32> {
        debug!(fh, offset, len = data.len(), "write");
        let file = self.handles.lock().await.get(fh)?;
        if file.flags & libc::O_ACCMODE == libc::O_RDONLY {
            return Err(FsError::BadDescriptor(fh));
        }
        let written = u32::try_from(data.len()).map_err(|_| FsError::FileTooLarge)?;
        let end = offset
            .checked_add(u64::from(written))
            .ok_or(FsError::FileTooLarge)?;
        file_len(end)?;
        let offset = file_len(offset)?;

        let mut conn = self.connection().await?;
        let content = self
            .inodes
            .get(&mut conn, file.inode)
            .await?
            .ok_or(FsError::NotFound)?;
        let content = splice(content, offset, data);
        self.inodes.put(&mut conn, file.inode, &content).await?;

        Ok(written)
    }

    async fn release(&self, fh: u64) -> Result<()> {
        debug!(fh, "release");
        let released = self.handles.lock().await.release(fh)?;
        if released.reclaim {
            let mut conn = self.connection().await?;
            self.inodes.remove(&mut conn, released.inode).await?;
            debug!(ino = released.inode, "reclaimed unlinked inode");
        }
        Ok(())
    }

    async fn setattr(&self, ino: u64, changes: SetAttr, fh: Option<u64>) -> Result<Attributes> {
        debug!(ino, ?changes, ?fh, "setattr");
        let mut conn = self.connection().await?;
        let attr = self.attributes(&mut conn, ino).await?;

        if let Some(size) = changes.size {
            if attr.is_dir() {
                return Err(FsError::IsADirectory);
            }
            let size = file_len(size)?;
            let mut content = self
                .inodes
                .get(&mut conn, ino)
                .await?
                .ok_or(FsError::NotFound)?;
            content.resize(size, 0);
            self.inodes.put(&mut conn, ino, &content).await?;
        }

        // No metadata columns to hold these
        if changes.mode.is_some()
            || changes.uid.is_some()
            || changes.gid.is_some()
            || changes.atime.is_some()
            || changes.mtime.is_some()
        {
            debug!(ino, "ignoring metadata changes");
        }

        self.attributes(&mut conn, ino).await
    }

    async fn unlink(&self, parent: u64, name: &str) -> Result<()> {
        debug!(parent, name, "unlink");
        // Taken before the transaction, as `open` does, so the open count
        // cannot change until the delete commits
        let mut handles = self.handles.lock().await;
        let mut tx = self.backend.begin().await?;

        let entry = self
            .entries
            .lookup(&mut tx, parent, name)
            .await?
            .ok_or(FsError::NotFound)?;
        if self.inodes.get(&mut tx, entry.inode).await?.is_none() {
            return Err(FsError::IsADirectory);
        }

        self.entries.remove(&mut tx, entry.sequence_id).await?;
        if handles.open_count(entry.inode) > 0 {
            handles.mark_unlinked(entry.inode);
        } else {
            self.inodes.remove(&mut tx, entry.inode).await?;
        }
        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_range_clips() {
        let content = b"world";
        assert_eq!(read_range(content, 0, 5), b"world");
        assert_eq!(read_range(content, 2, 10), b"rld");
        assert_eq!(read_range(content, 5, 3), b"");
        assert_eq!(read_range(content, 100, 3), b"");
        assert_eq!(read_range(content, u64::MAX, u32::MAX), b"");
    }

    #[test]
    fn test_splice_overwrites_and_extends() {
        assert_eq!(splice(b"world".to_vec(), 0, b"W"), b"World");
        assert_eq!(splice(b"world".to_vec(), 3, b"LDS"), b"worLDS");
        assert_eq!(splice(b"world".to_vec(), 5, b"!!!"), b"world!!!");
        assert_eq!(splice(Vec::new(), 0, b"abc"), b"abc");
        assert_eq!(splice(b"abc".to_vec(), 1, b""), b"abc");
    }

    #[test]
    fn test_splice_zero_fills_gap() {
        let out = splice(b"ab".to_vec(), 5, b"xy");
        assert_eq!(out.len(), 5 + 2);
        assert_eq!(out, b"ab\0\0\0xy");
    }

    #[test]
    fn test_default_config_reports_process_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        let config = FsConfig::default();
        assert_eq!(config.uid, meta.uid());
        assert_eq!(config.ttl, Duration::from_secs(1));
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("hello.txt").is_ok());
        assert!(matches!(check_name(""), Err(FsError::InvalidArgument(_))));
        assert!(matches!(check_name("."), Err(FsError::InvalidArgument(_))));
        assert!(matches!(check_name("a/b"), Err(FsError::InvalidArgument(_))));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(check_name(&long), Err(FsError::NameTooLong)));
    }
}
