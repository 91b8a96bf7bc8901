//! Database schema definitions for sqlfs
//!
//! Two tables back the filesystem: `inodes` holds file content keyed by a
//! monotonically assigned id, `files` holds the name -> inode links together
//! with the id of the containing directory. Directories have no `inodes` row;
//! an id is a directory when it names an entry without content or when some
//! entry lives under it.

/// File type constants for mode field
pub mod mode {
    pub const S_IFREG: u32 = 0o100000;  // Regular file
    pub const S_IFDIR: u32 = 0o040000;  // Directory

    // Default permissions
    pub const DEFAULT_FILE_PERM: u16 = 0o644; // rw-r--r--
    pub const DEFAULT_DIR_PERM: u16 = 0o755;  // rwxr-xr-x
}

/// Root inode number (always 1, never stored in `inodes`)
pub const ROOT_INO: u64 = 1;

/// Size reported for every directory
pub const DIR_SIZE: u64 = 4096;

/// Largest file content accepted, in bytes (the LONGBLOB limit)
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Longest name accepted for a single entry, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Block size reported in attributes
pub const BLOCK_SIZE: u32 = 512;
