//! FUSE adapter implementation
//!
//! Maps `fuser` callbacks onto [`Operations`]. Callbacks arrive on the
//! session thread and block on the async adapter through a Tokio runtime
//! handle, so the session thread must not itself be a runtime worker.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::{c_int, EINVAL};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    fs::SqlFs,
    ops::{Attributes, FileKind, Operations, SetAttr},
    schema::BLOCK_SIZE,
    FsError,
};

/// Name the mount shows up under in the mount table
pub const FS_NAME: &str = "sqlfs";

/// Mount options for a sqlfs mount.
///
/// `default_permissions` is left off on purpose: `access` grants everything
/// and the kernel should not second-guess it.
pub fn mount_options(allow_other: bool, auto_unmount: bool) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::Subtype(FS_NAME.to_string()),
        MountOption::RW,
    ];
    if allow_other {
        options.push(MountOption::AllowOther);
    }
    if auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    options
}

/// `fuser::Filesystem` bridge over [`SqlFs`]
pub struct SqlFuse {
    fs: Arc<SqlFs>,
    runtime: Handle,
    ttl: Duration,
}

impl SqlFuse {
    pub fn new(fs: Arc<SqlFs>, runtime: Handle) -> Self {
        let ttl = fs.config().ttl;
        Self { fs, runtime, ttl }
    }

    fn to_fuse(&self, attr: &Attributes) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks(),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::RegularFile => FileType::RegularFile,
    }
}

/// Errno for `err`, logging storage failures that are about to become `EIO`.
fn errno(op: &str, err: FsError) -> c_int {
    if err.is_infrastructure() {
        warn!(op, error = %err, "storage failure");
    } else {
        debug!(op, error = %err, "request failed");
    }
    err.errno()
}

fn utf8_name(name: &OsStr) -> Option<&str> {
    name.to_str()
}

fn time_or_now(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl fuser::Filesystem for SqlFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("sqlfs FUSE adapter initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("sqlfs FUSE adapter destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = utf8_name(name) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.lookup(parent, name)) {
            Ok(attr) => reply.entry(&self.ttl, &self.to_fuse(&attr), 0),
            Err(e) => reply.error(errno("lookup", e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.runtime.block_on(self.fs.getattr(ino)) {
            Ok(attr) => reply.attr(&self.ttl, &self.to_fuse(&attr)),
            Err(e) => reply.error(errno("getattr", e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetAttr {
            size,
            mode,
            uid,
            gid,
            atime: atime.map(time_or_now),
            mtime: mtime.map(time_or_now),
        };
        match self.runtime.block_on(self.fs.setattr(ino, changes, fh)) {
            Ok(attr) => reply.attr(&self.ttl, &self.to_fuse(&attr)),
            Err(e) => reply.error(errno("setattr", e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = utf8_name(name) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.unlink(parent, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.runtime.block_on(self.fs.open(ino, flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("open", e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.read(ino, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.write(fh, offset, data)) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(errno("write", e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.runtime.block_on(self.fs.release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.runtime.block_on(self.fs.opendir(ino)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("opendir", e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Ok(cursor) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.readdir(ino, cursor)) {
            Ok(entries) => {
                for entry in entries {
                    // The kernel resumes from the offset of the last entry it kept
                    if reply.add(
                        entry.attr.ino,
                        entry.next_cursor as i64,
                        file_type(entry.attr.kind),
                        &entry.name,
                    ) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(errno("readdir", e)),
        }
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        match self.runtime.block_on(self.fs.releasedir(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("releasedir", e)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        match self.runtime.block_on(self.fs.access(ino, mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("access", e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = utf8_name(name) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.fs.create(parent, name, mode, flags)) {
            Ok(created) => {
                reply.created(&self.ttl, &self.to_fuse(&created.attr), 0, created.fh, 0)
            }
            Err(e) => reply.error(errno("create", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_options() {
        let options = mount_options(false, false);
        assert!(options.contains(&MountOption::FSName(FS_NAME.to_string())));
        assert!(!options.contains(&MountOption::DefaultPermissions));
        assert!(!options.contains(&MountOption::AllowOther));

        let options = mount_options(true, true);
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn test_errno_passthrough() {
        assert_eq!(errno("lookup", FsError::NotFound), libc::ENOENT);
        assert_eq!(errno("read", FsError::Query("boom".into())), libc::EIO);
    }

    #[test]
    fn test_file_type() {
        assert_eq!(file_type(FileKind::Directory), FileType::Directory);
        assert_eq!(file_type(FileKind::RegularFile), FileType::RegularFile);
    }
}
