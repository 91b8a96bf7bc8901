//! Open file descriptor table
//!
//! Handles returned by `open`/`create` are allocated here from a counter of
//! their own, so two opens of one inode get two handles. The table also
//! counts opens per inode so that an unlinked file keeps its content until
//! the last `release`.

use std::collections::HashMap;

use crate::{error::Result, FsError};

/// State kept for one open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub inode: u64,
    pub flags: i32,
}

/// What `release` left behind for the inode it closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub inode: u64,
    /// This was the last handle on an inode whose name is already gone;
    /// the caller should drop the content.
    pub reclaim: bool,
}

#[derive(Debug)]
pub struct DescriptorTable {
    next: u64,
    open: HashMap<u64, OpenFile>,
    counts: HashMap<u64, usize>,
    unlinked: Vec<u64>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self {
            next: 1,
            open: HashMap::new(),
            counts: HashMap::new(),
            unlinked: Vec::new(),
        }
    }

    /// Register a new open of `inode` and return its handle.
    pub fn open(&mut self, inode: u64, flags: i32) -> u64 {
        let fh = self.next;
        self.next += 1;
        self.open.insert(fh, OpenFile { inode, flags });
        *self.counts.entry(inode).or_insert(0) += 1;
        fh
    }

    pub fn get(&self, fh: u64) -> Result<OpenFile> {
        self.open.get(&fh).copied().ok_or(FsError::BadDescriptor(fh))
    }

    /// Drop a handle. Fails for handles that were never issued or were
    /// already released.
    pub fn release(&mut self, fh: u64) -> Result<Released> {
        let file = self.open.remove(&fh).ok_or(FsError::BadDescriptor(fh))?;

        let remaining = match self.counts.get_mut(&file.inode) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };

        let mut reclaim = false;
        if remaining == 0 {
            self.counts.remove(&file.inode);
            if let Some(pos) = self.unlinked.iter().position(|&ino| ino == file.inode) {
                self.unlinked.swap_remove(pos);
                reclaim = true;
            }
        }

        Ok(Released {
            inode: file.inode,
            reclaim,
        })
    }

    /// Number of live handles on `inode`.
    pub fn open_count(&self, inode: u64) -> usize {
        self.counts.get(&inode).copied().unwrap_or(0)
    }

    /// Remember that `inode` lost its name while still open.
    pub fn mark_unlinked(&mut self, inode: u64) {
        if !self.unlinked.contains(&inode) {
            self.unlinked.push(inode);
        }
    }

    pub fn is_unlinked(&self, inode: u64) -> bool {
        self.unlinked.contains(&inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_distinct_per_open() {
        let mut table = DescriptorTable::new();
        let a = table.open(2, libc::O_RDONLY);
        let b = table.open(2, libc::O_RDWR);
        assert_ne!(a, b);
        assert_eq!(table.open_count(2), 2);
        assert_eq!(table.get(a).unwrap().inode, 2);
        assert_eq!(table.get(b).unwrap().flags, libc::O_RDWR);

        let released = table.release(a).unwrap();
        assert_eq!(released, Released { inode: 2, reclaim: false });
        assert_eq!(table.open_count(2), 1);
        assert!(matches!(table.get(a), Err(FsError::BadDescriptor(fh)) if fh == a));
    }

    #[test]
    fn test_double_release_is_rejected() {
        let mut table = DescriptorTable::new();
        let fh = table.open(5, 0);
        table.release(fh).unwrap();
        assert!(matches!(table.release(fh), Err(FsError::BadDescriptor(_))));
        assert!(matches!(table.release(42), Err(FsError::BadDescriptor(42))));
    }

    #[test]
    fn test_last_release_reclaims_unlinked_inode() {
        let mut table = DescriptorTable::new();
        let a = table.open(9, 0);
        let b = table.open(9, 0);
        table.mark_unlinked(9);
        assert!(table.is_unlinked(9));

        assert!(!table.release(a).unwrap().reclaim);
        assert!(table.release(b).unwrap().reclaim);
        assert!(!table.is_unlinked(9));
        assert_eq!(table.open_count(9), 0);
    }
}
