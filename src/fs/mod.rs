//! The SFFS core: on-disk layout, allocation engine and inode-list indexing.

pub mod alloc;
pub mod bitmaps;
pub mod device;
pub mod direntry;
pub mod filekind;
pub mod fs_api_impl;
pub mod fs_layout;
pub mod inode;
pub mod superblock;

pub use fs_layout::Sffs;

/// Data block ID
#[allow(non_camel_case_types)]
pub type blk32 = u32;
/// Inode ID
#[allow(non_camel_case_types)]
pub type ino32 = u32;
/// Bitmap bit index
#[allow(non_camel_case_types)]
pub type bmap_t = u32;

pub const SFFS_MAGIC: u32 = 0x53FF5346;

/// Default inode ratio is 1 : 128KiB, the span a primary record's pointer
/// area covers at a 4096-byte block size.
pub const SFFS_INODE_RATIO: u32 = 131072;

pub const SFFS_MAX_MOUNT: u16 = 16;

/// Maximum records in one inode list; 0 disables the cap.
pub const SFFS_MAX_INODE_LIST: u32 = 32;

/// Inode record size on disk.
pub const SFFS_INODE_SIZE: u16 = 128;

/// Size of the data-pointer area that follows each record.
pub const SFFS_INODE_DATA_SIZE: u16 = 128;

pub const SFFS_RESV_INODES: u32 = 0;

pub const SFFS_ROOT_INO: ino32 = 0;

/// The superblock sits at this byte offset regardless of the block size.
pub const SFFS_SB_OFFSET: u64 = 1024;

/// Encoded superblock size in bytes.
pub const SFFS_SB_SIZE: usize = 100;

/// Blocks per allocation group: one machine word of the data bitmap.
pub const SFFS_BLOCKS_PER_GROUP: u32 = 64;

/// Ask the resolver to also read the block content.
pub const SFFS_GET_BLK_RD: u32 = 0o1;
/// Ask the resolver for the file's last block.
pub const SFFS_GET_BLK_LT: u32 = 0o2;

/// Header bytes of a directory record.
pub const SFFS_DIRENTRY_LENGTH: u16 = 8;
/// Maximum size of a whole directory record.
pub const SFFS_MAX_DIR_ENTRY: u16 = 256;

/// File type bits in `i_mode`. Only types encoded by a single nibble bit are
/// accepted at creation time.
pub const SFFS_IFMT: u16 = 0o170000;
pub const SFFS_IFIFO: u16 = 0o010000;
pub const SFFS_IFCHR: u16 = 0o020000;
pub const SFFS_IFDIR: u16 = 0o040000;
pub const SFFS_IFREG: u16 = 0o100000;

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::PathBuf;

    use super::fs_layout::Sffs;
    use super::SFFS_INODE_RATIO;

    /// A formatted image that has never been mounted: bitmaps all zero, no
    /// root directory yet.
    pub(crate) fn fresh_image(fs_size: u64, block_size: u32) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");
        crate::mkfs::mkfs(&path, fs_size, Some(block_size), SFFS_INODE_RATIO).unwrap();
        (dir, path)
    }

    /// A context over a formatted image, without the mount-time bookkeeping
    /// or root bootstrap.
    pub(crate) fn fresh_fs(fs_size: u64, block_size: u32) -> (tempfile::TempDir, Sffs) {
        let (dir, path) = fresh_image(fs_size, block_size);
        let fs = Sffs::open_image(path).unwrap();
        (dir, fs)
    }

    /// A fully mounted file system with its root in place.
    pub(crate) fn mounted_fs(fs_size: u64, block_size: u32) -> (tempfile::TempDir, Sffs) {
        let (dir, path) = fresh_image(fs_size, block_size);
        let fs = Sffs::mount(path).unwrap();
        (dir, fs)
    }
}
