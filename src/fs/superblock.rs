//! The superblock sits at byte offset 1024 of the image and records the
//! geometry every other component derives its addressing from. The in-memory
//! copy held by the mounted context is authoritative; the on-disk copy is
//! refreshed at least on unmount and on statfs flushes.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{SffsError, SffsResult};
use crate::fs::device::Device;
use crate::fs::{
    blk32, SFFS_BLOCKS_PER_GROUP, SFFS_INODE_DATA_SIZE, SFFS_INODE_SIZE, SFFS_MAGIC,
    SFFS_MAX_INODE_LIST, SFFS_MAX_MOUNT, SFFS_RESV_INODES, SFFS_SB_OFFSET, SFFS_SB_SIZE,
};
use crate::utils::disk_serialize::DiskSerialize;
use crate::utils::time_util;

/// On-disk superblock, REV. 1. Field order is the wire layout; the legacy
/// bincode configuration keeps it packed and little-endian.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// Total inodes count
    pub s_inodes_count: u32,
    /// Number of reserved inodes
    pub s_inodes_reserved: u32,
    /// Total blocks count
    pub s_blocks_count: u32,
    /// Free data blocks
    pub s_free_blocks_count: u32,
    /// Free inodes
    pub s_free_inodes_count: u32,
    /// Block's size in bytes
    pub s_block_size: u32,
    /// Number of blocks per group
    pub s_blocks_per_group: u32,
    /// Number of block groups
    pub s_group_count: u32,
    /// Number of entirely free block groups
    pub s_free_groups: u32,
    /// Low precision mount time
    pub s_mount_time: u16,
    /// Low precision last write time
    pub s_write_time: u16,
    /// Number of mounts since creation
    pub s_mount_count: u16,
    /// Maximum number of mounts
    pub s_max_mount_count: u16,
    /// File system state
    pub s_state: u16,
    /// Last occurred error
    pub s_error: u16,
    /// Inode size in bytes
    pub s_inode_size: u16,
    /// Inode data-pointer area size in bytes
    pub s_inode_block_size: u16,
    /// SFFS magic number
    pub s_magic: u32,
    /// Maximum length of a single inode list, 0 meaning no cap
    pub s_max_inode_list: u32,
    /// Feature flags
    pub s_features: u32,
    /// How many blocks to preallocate for a regular file
    pub s_prealloc_blocks: u32,
    /// How many blocks to preallocate for a directory
    pub s_prealloc_dir_blocks: u32,
    /// Data bitmap starting block
    pub s_data_bitmap_start: blk32,
    /// Data bitmap size in blocks
    pub s_data_bitmap_size: blk32,
    /// First block of the data region
    pub s_first_data_block: blk32,
    /// Global Inode Table bitmap starting block
    pub s_git_bitmap_start: blk32,
    /// Global Inode Table bitmap size in blocks
    pub s_git_bitmap_size: blk32,
    /// Global Inode Table starting block
    pub s_git_start: blk32,
    /// Global Inode Table size in blocks
    pub s_git_size: blk32,
}

impl DiskSerialize for SuperBlock {}

impl SuperBlock {
    /// Compute a fresh layout for an image of `fs_size` bytes.
    ///
    /// The four regions (head, bitmaps, inode table, data) must partition the
    /// device exactly; a mismatch fails the whole initialization.
    pub fn build(fs_size: u64, block_size: u32, inode_ratio: u32) -> SffsResult<SuperBlock> {
        check_block_size(block_size)?;
        if inode_ratio == 0 {
            return Err(SffsError::InvalidArgument("inode ratio must be non-zero"));
        }

        let entry_size = (SFFS_INODE_SIZE + SFFS_INODE_DATA_SIZE) as u32;
        let total_blocks = (fs_size / block_size as u64) as u32;
        let total_inodes = ((total_blocks as u64 * block_size as u64) / inode_ratio as u64) as u32;
        if total_inodes == 0 {
            return Err(SffsError::Init(format!(
                "image of {fs_size} bytes leaves no room for inodes"
            )));
        }

        let per_block = block_size / entry_size;
        let git_size = total_inodes / per_block + 1;
        let git_bitmap_bytes = total_inodes / 8 + 1;
        let git_bitmap_blks = git_bitmap_bytes / block_size + 1;

        // Boot area plus the fixed superblock window at byte 1024.
        let head_blks = (SFFS_SB_OFFSET as u32 + SFFS_SB_SIZE as u32).div_ceil(block_size);

        let meta_blks = head_blks + git_bitmap_blks + git_size;
        if total_blocks <= meta_blks {
            return Err(SffsError::Init(format!(
                "{fs_size} bytes cannot hold {meta_blks} metadata blocks"
            )));
        }

        let mut data_blocks = total_blocks - meta_blks;
        let data_bitmap_bytes = data_blocks / 8 + 1;
        let data_bitmap_blks = data_bitmap_bytes / block_size + 1;
        if data_blocks <= data_bitmap_blks {
            return Err(SffsError::Init(format!(
                "{fs_size} bytes leave no data blocks past the bitmaps"
            )));
        }
        data_blocks -= data_bitmap_blks;

        if meta_blks + data_bitmap_blks + data_blocks != total_blocks {
            return Err(SffsError::Init(
                "region sizes do not add up to the device size".to_string(),
            ));
        }

        let mut acc_address = head_blks;
        let data_bitmap_start = acc_address;
        acc_address += data_bitmap_blks;
        let git_bitmap_start = acc_address;
        acc_address += git_bitmap_blks;
        let git_start = acc_address;
        acc_address += git_size;
        let first_data_block = acc_address;

        Ok(SuperBlock {
            s_inodes_count: total_inodes,
            s_inodes_reserved: SFFS_RESV_INODES,
            s_blocks_count: total_blocks,
            s_free_blocks_count: data_blocks,
            s_free_inodes_count: total_inodes,
            s_block_size: block_size,
            s_blocks_per_group: SFFS_BLOCKS_PER_GROUP,
            s_group_count: data_blocks / SFFS_BLOCKS_PER_GROUP,
            s_free_groups: data_blocks / SFFS_BLOCKS_PER_GROUP,
            s_mount_time: 0,
            s_write_time: time_util::low_precision_now(),
            s_mount_count: 0,
            s_max_mount_count: SFFS_MAX_MOUNT,
            s_state: 0,
            s_error: 0,
            s_inode_size: SFFS_INODE_SIZE,
            s_inode_block_size: SFFS_INODE_DATA_SIZE,
            s_magic: SFFS_MAGIC,
            s_max_inode_list: SFFS_MAX_INODE_LIST,
            s_features: 0,
            s_prealloc_blocks: 0,
            s_prealloc_dir_blocks: 0,
            s_data_bitmap_start: data_bitmap_start,
            s_data_bitmap_size: data_bitmap_blks,
            s_first_data_block: first_data_block,
            s_git_bitmap_start: git_bitmap_start,
            s_git_bitmap_size: git_bitmap_blks,
            s_git_start: git_start,
            s_git_size: git_size,
        })
    }

    pub fn read_from(device: &Device) -> SffsResult<SuperBlock> {
        let mut buf = [0u8; SFFS_SB_SIZE];
        device.read_at(SFFS_SB_OFFSET, &mut buf)?;
        let (sb, _) = <SuperBlock as DiskSerialize>::deserialize(&buf)?;
        Ok(sb)
    }

    pub fn write_to(&self, device: &Device) -> SffsResult<()> {
        let bytes = DiskSerialize::serialize(self)?;
        device.write_at(SFFS_SB_OFFSET, &bytes)
    }

    /// Size of one Global Inode Table slot: the record plus its pointer area.
    pub fn entry_size(&self) -> u32 {
        (self.s_inode_size + self.s_inode_block_size) as u32
    }

    /// Inode entries per table block.
    pub fn inodes_per_block(&self) -> u32 {
        self.s_block_size / self.entry_size()
    }

    /// Pointer slots in a primary record's data-pointer area.
    pub fn primary_ptrs(&self) -> u32 {
        self.s_inode_block_size as u32 / 4
    }

    /// Pointer slots in a supplementary record, which reuses all of the slot
    /// past its 8-byte header.
    pub fn supp_ptrs(&self) -> u32 {
        (self.entry_size() - 8) / 4
    }

    /// Total pointer capacity of a list of `list_size` records.
    pub fn ptr_capacity(&self, list_size: u32) -> u32 {
        self.primary_ptrs() + (list_size - 1) * self.supp_ptrs()
    }

    /// Number of blocks in the data region.
    pub fn data_blocks(&self) -> u32 {
        self.s_blocks_count - self.s_first_data_block
    }
}

fn check_block_size(block_size: u32) -> SffsResult<()> {
    let entry_size = (SFFS_INODE_SIZE + SFFS_INODE_DATA_SIZE) as u32;
    if block_size == 0 || !block_size.is_power_of_two() || block_size < entry_size {
        return Err(SffsError::InvalidBlockSize(block_size));
    }
    if block_size > crate::fs::device::page_size() {
        return Err(SffsError::InvalidBlockSize(block_size));
    }
    if !(1024..=4096).contains(&block_size) {
        warn!("block size {block_size} is outside the optimized 1024..4096 range");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn test_wire_size() {
        let sb = SuperBlock::default();
        assert_eq!(DiskSerialize::serialize(&sb).unwrap().len(), SFFS_SB_SIZE);
    }

    #[test]
    fn test_build_50mib_4096() {
        let sb = SuperBlock::build(52428800, 4096, 131072).unwrap();
        assert_eq!(sb.s_magic, SFFS_MAGIC);
        assert_eq!(sb.s_block_size, 4096);
        assert_eq!(sb.s_blocks_count, 12800);
        assert_eq!(sb.s_inodes_count, 400);
        assert_eq!(sb.s_git_size, 26);
        assert_eq!(sb.s_git_bitmap_size, 1);
        assert_eq!(sb.s_data_bitmap_size, 1);
        assert_eq!(sb.s_data_bitmap_start, 1);
        assert_eq!(sb.s_first_data_block, 29);
        assert_eq!(sb.s_free_blocks_count, 12771);

        // the regions partition the device exactly
        let head = 1;
        assert_eq!(
            head + sb.s_data_bitmap_size + sb.s_git_bitmap_size + sb.s_git_size + sb.data_blocks(),
            sb.s_blocks_count
        );
        assert_eq!(sb.s_group_count, sb.data_blocks() / 64);
    }

    #[test]
    fn test_build_50mib_1024() {
        // at 1024 bytes the superblock window no longer shares block 0 with
        // the boot area
        let sb = SuperBlock::build(52428800, 1024, 131072).unwrap();
        assert_eq!(sb.s_blocks_count, 51200);
        assert_eq!(sb.s_inodes_count, 400);
        assert_eq!(sb.s_data_bitmap_start, 2);
        assert_eq!(sb.s_data_bitmap_size, 7);
        assert_eq!(sb.s_git_bitmap_size, 1);
        assert_eq!(sb.s_git_size, 101);
        assert_eq!(sb.s_first_data_block, 111);
        assert_eq!(sb.inodes_per_block(), 4);

        let head = 2;
        assert_eq!(
            head + sb.s_data_bitmap_size + sb.s_git_bitmap_size + sb.s_git_size + sb.data_blocks(),
            sb.s_blocks_count
        );
    }

    #[test]
    fn test_build_rejects_bad_block_sizes() {
        assert!(matches!(
            SuperBlock::build(52428800, 3000, 131072),
            Err(SffsError::InvalidBlockSize(_))
        ));
        assert!(matches!(
            SuperBlock::build(52428800, 0, 131072),
            Err(SffsError::InvalidBlockSize(_))
        ));
        // too small to hold a single inode entry
        assert!(matches!(
            SuperBlock::build(52428800, 128, 131072),
            Err(SffsError::InvalidBlockSize(_))
        ));
    }

    #[test]
    fn test_build_rejects_tiny_images() {
        assert!(matches!(
            SuperBlock::build(8192, 4096, 131072),
            Err(SffsError::Init(_))
        ));
    }

    #[test]
    fn test_round_trip_through_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();
        file.set_len(52428800).unwrap();
        let device = Device::from_file(file);

        let sb = SuperBlock::build(52428800, 4096, 131072).unwrap();
        sb.write_to(&device).unwrap();
        let back = SuperBlock::read_from(&device).unwrap();
        assert_eq!(sb, back);

        // the magic field sits 52 bytes into the superblock window
        let mut magic = [0u8; 4];
        device.read_at(1024 + 52, &mut magic).unwrap();
        assert_eq!(u32::from_le_bytes(magic), SFFS_MAGIC);
    }
}
