//! Create a new file system image.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use byte_unit::Byte;
use log::info;

use crate::fs::device::{self, Device};
use crate::fs::superblock::SuperBlock;

/// Format `image_path` as a fresh sffs image of `fs_size` bytes.
///
/// When no block size is given it is probed from the file system the image
/// lives on. The image file must not exist yet; `set_len` leaves every
/// region zeroed, which is exactly the empty-bitmap state a fresh file
/// system wants.
pub fn mkfs<P: AsRef<Path>>(
    image_path: P,
    fs_size: u64,
    block_size: Option<u32>,
    inode_ratio: u32,
) -> anyhow::Result<()> {
    let image_path = image_path.as_ref();
    let block_size = match block_size {
        Some(size) => size,
        None => {
            let probe_at = image_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            device::host_block_size(probe_at)?
        }
    };

    let superblock = SuperBlock::build(fs_size, block_size, inode_ratio)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_path)
        .with_context(|| format!("cannot create image file {}", image_path.display()))?;
    file.set_len(fs_size)
        .context("cannot size the image file")?;

    let device = Device::from_file(file);
    superblock.write_to(&device)?;

    info!(
        "created a {} sffs image with block size {block_size}",
        Byte::from_bytes(fs_size as _).get_appropriate_unit(true)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{Sffs, SFFS_INODE_RATIO, SFFS_MAGIC};

    #[test]
    fn test_mkfs_writes_a_valid_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.img");
        mkfs(&path, 52428800, Some(4096), SFFS_INODE_RATIO).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 52428800);

        let fs = Sffs::open_image(&path).unwrap();
        assert_eq!(fs.sb.s_magic, SFFS_MAGIC);
        assert_eq!(fs.sb.s_block_size, 4096);
        assert_eq!(fs.sb.s_blocks_count, 12800);

        // both bitmaps start entirely clear
        let bitmap_blocks = fs.sb.s_data_bitmap_size + fs.sb.s_git_bitmap_size;
        let mut region = vec![0u8; (bitmap_blocks * fs.sb.s_block_size) as usize];
        fs.device
            .read_blk(fs.sb.s_data_bitmap_start, &mut region)
            .unwrap();
        assert!(region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mkfs_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.img");
        mkfs(&path, 52428800, Some(4096), SFFS_INODE_RATIO).unwrap();
        assert!(mkfs(&path, 52428800, Some(4096), SFFS_INODE_RATIO).is_err());
    }

    #[test]
    fn test_mkfs_rejects_undersized_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.img");
        assert!(mkfs(&path, 4096, Some(4096), SFFS_INODE_RATIO).is_err());
        assert!(!path.exists());
    }
}
