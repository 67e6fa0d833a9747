//! The mounted file system: one context object owning the device handle and
//! the authoritative in-memory superblock, with the path-level operations the
//! kernel bridge calls into. All operations run on the caller's thread and
//! complete before returning.

use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path};

use log::{info, warn};

use crate::error::{SffsError, SffsResult};
use crate::fs::device::Device;
use crate::fs::direntry::Direntry;
use crate::fs::filekind::FileKind;
use crate::fs::inode::InodeEntry;
use crate::fs::superblock::SuperBlock;
use crate::fs::{ino32, SFFS_IFDIR, SFFS_MAGIC, SFFS_ROOT_INO};
use crate::utils::time_util;

pub struct Sffs {
    pub(crate) device: Device,
    pub(crate) sb: SuperBlock,
}

/// Attributes of one file, the `getattr` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub ino: ino32,
    pub mode: u16,
    pub nlink: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u32,
    pub atime: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub crtime: u64,
}

/// One `readdir` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: Vec<u8>,
    pub ino: ino32,
    pub file_type: u16,
}

/// The `statfs` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    pub blocks: u32,
    pub free_blocks: u32,
    pub inodes: u32,
    pub free_inodes: u32,
    pub magic: u32,
}

impl Sffs {
    /// Mount an image: read and verify the superblock, bump the mount
    /// bookkeeping and bootstrap the root directory if the image is fresh.
    pub fn mount<P: AsRef<Path>>(image: P) -> SffsResult<Sffs> {
        let mut fs = Sffs::open_image(image)?;

        if fs.sb.s_mount_count >= fs.sb.s_max_mount_count {
            warn!(
                "image saw {} mounts, more than the advised {}",
                fs.sb.s_mount_count, fs.sb.s_max_mount_count
            );
        }
        fs.sb.s_mount_count = fs.sb.s_mount_count.wrapping_add(1);
        fs.sb.s_mount_time = time_util::low_precision_now();
        fs.sb.s_state = 1;

        fs.ensure_root()?;
        fs.sb.write_to(&fs.device)?;
        info!(
            "mounted image with {} blocks, {} inodes",
            fs.sb.s_blocks_count, fs.sb.s_inodes_count
        );
        Ok(fs)
    }

    /// Open an image and load its superblock without any mount side effects.
    pub(crate) fn open_image<P: AsRef<Path>>(image: P) -> SffsResult<Sffs> {
        let mut device = Device::open(image)?;
        let sb = SuperBlock::read_from(&device)?;

        if sb.s_magic != SFFS_MAGIC {
            return Err(SffsError::Init(format!(
                "magic {:#010x} does not identify an sffs image",
                sb.s_magic
            )));
        }
        if sb.s_block_size == 0 || !sb.s_block_size.is_power_of_two() {
            return Err(SffsError::Init(format!(
                "superblock carries a bogus block size {}",
                sb.s_block_size
            )));
        }
        device.set_geometry(sb.s_block_size, sb.s_first_data_block);
        Ok(Sffs { device, sb })
    }

    /// Flush the superblock and release the image.
    pub fn unmount(mut self) -> SffsResult<()> {
        self.sb.s_state = 0;
        self.sb.s_write_time = time_util::low_precision_now();
        self.sb.write_to(&self.device)
    }

    /// Attributes of the file at `path`.
    pub fn getattr<P: AsRef<Path>>(&self, path: P) -> SffsResult<FileStat> {
        let entry = self.resolve_path(path.as_ref())?;
        Ok(self.stat_of(&entry))
    }

    /// Entries of the directory at `path`, in on-disk order.
    pub fn readdir<P: AsRef<Path>>(&self, path: P) -> SffsResult<Vec<DirEntryInfo>> {
        let entry = self.resolve_path(path.as_ref())?;
        let records = self.read_dir(&entry)?;
        Ok(records
            .into_iter()
            .map(|rec| DirEntryInfo {
                name: rec.name,
                ino: rec.ino_id,
                file_type: rec.file_type,
            })
            .collect())
    }

    /// Create a directory at `path` with the permission bits of `mode`.
    pub fn mkdir<P: AsRef<Path>>(&mut self, path: P, mode: u16) -> SffsResult<FileStat> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .ok_or(SffsError::InvalidArgument("mkdir needs a directory name"))?;
        let parent_path = path
            .parent()
            .ok_or(SffsError::InvalidArgument("the root cannot be created"))?;

        let mut parent = self.resolve_path(parent_path)?;
        let child = self.mkdir_at(&mut parent, name.as_bytes(), mode)?;
        Ok(self.stat_of(&child))
    }

    /// File system statistics; doubles as a flush point for the superblock.
    pub fn statfs(&mut self) -> SffsResult<FsStats> {
        self.sb.s_write_time = time_util::low_precision_now();
        self.sb.write_to(&self.device)?;
        Ok(FsStats {
            block_size: self.sb.s_block_size,
            blocks: self.sb.s_blocks_count,
            free_blocks: self.sb.s_free_blocks_count,
            inodes: self.sb.s_inodes_count,
            free_inodes: self.sb.s_free_inodes_count,
            magic: self.sb.s_magic,
        })
    }

    /// Create a directory named `name` under an already-resolved parent.
    pub(crate) fn mkdir_at(
        &mut self,
        parent: &mut InodeEntry,
        name: &[u8],
        mode: u16,
    ) -> SffsResult<InodeEntry> {
        if !FileKind::is_dir(parent.ino.i_mode) {
            return Err(SffsError::InvalidArgument("parent is not a directory"));
        }
        match self.lookup_direntry(parent, name) {
            Ok(_) => return Err(SffsError::EntryExists),
            Err(SffsError::NoEntry) => {}
            Err(e) => return Err(e),
        }

        let mode = (mode & 0o7777) | SFFS_IFDIR;
        let ino_id = self.alloc_inode()?;
        let mut child = self.creat_inode(ino_id, mode, 0)?;
        child.ino.i_link_count = 2;
        let record = Direntry::new(ino_id, mode, name)?;

        self.write_inode(&child)?;
        self.init_direntry(Some(&*parent), &mut child)?;
        self.add_direntry(parent, &record)?;

        parent.ino.i_link_count += 1;
        parent.ino.touch_modified();
        self.write_inode(parent)?;
        Ok(child)
    }

    /// Walk `path` from the root directory down to its inode.
    pub(crate) fn resolve_path(&self, path: &Path) -> SffsResult<InodeEntry> {
        let mut entry = self.read_inode(SFFS_ROOT_INO)?;
        for component in path.components() {
            let name: &[u8] = match component {
                Component::RootDir | Component::CurDir => continue,
                Component::ParentDir => b"..",
                Component::Normal(name) => name.as_bytes(),
                Component::Prefix(_) => {
                    return Err(SffsError::InvalidArgument("unsupported path prefix"))
                }
            };
            let (record, _) = self.lookup_direntry(&entry, name)?;
            entry = self.read_inode(record.ino_id)?;
        }
        Ok(entry)
    }

    pub(crate) fn stat_of(&self, entry: &InodeEntry) -> FileStat {
        let block_size = self.sb.s_block_size as u64;
        let blocks = entry.ino.i_blks_count as u64;
        let size = if blocks == 0 {
            0
        } else if FileKind::is_dir(entry.ino.i_mode) {
            blocks * block_size
        } else {
            let tail = if entry.ino.i_bytes_rem > 0 {
                entry.ino.i_bytes_rem as u64
            } else {
                block_size
            };
            (blocks - 1) * block_size + tail
        };

        FileStat {
            ino: entry.ino.i_inode_num,
            mode: entry.ino.i_mode,
            nlink: entry.ino.i_link_count,
            uid: entry.ino.i_uid_owner,
            gid: entry.ino.i_gid_owner,
            size,
            blocks: entry.ino.i_blks_count,
            atime: entry.ino.i_acc_time,
            ctime: entry.ino.i_chg_time,
            mtime: entry.ino.i_mod_time,
            crtime: entry.ino.i_crt_time,
        }
    }

    /// A scratch buffer of one block, local to the calling operation.
    pub(crate) fn block_buf(&self) -> SffsResult<Vec<u8>> {
        let size = self.sb.s_block_size as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| SffsError::MemAlloc)?;
        buf.resize(size, 0);
        Ok(buf)
    }

    /// A fresh image has no root; allocate inode 0 as `IFDIR | 0755` and
    /// give it its `.`/`..` block.
    fn ensure_root(&mut self) -> SffsResult<()> {
        if self.check_git_bm(SFFS_ROOT_INO)? {
            return Ok(());
        }

        let ino_id = self.alloc_inode()?;
        if ino_id != SFFS_ROOT_INO {
            return Err(SffsError::Corrupted("root slot is taken on a fresh image"));
        }
        let mut root = self.creat_inode(ino_id, SFFS_IFDIR | 0o755, 0)?;
        root.ino.i_link_count = 2;
        self.write_inode(&root)?;
        self.init_direntry(None, &mut root)?;
        info!("created root directory on a fresh image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testutil::{fresh_image, mounted_fs};
    use crate::fs::SFFS_IFREG;

    #[test]
    fn test_mount_bootstraps_root() {
        let (_dir, fs) = mounted_fs(52428800, 4096);
        let root = fs.read_inode(SFFS_ROOT_INO).unwrap();
        assert_eq!(root.ino.i_mode, SFFS_IFDIR | 0o755);
        assert_eq!(root.ino.i_link_count, 2);
        assert_eq!(root.ino.i_blks_count, 1);

        let entries = fs.readdir("/").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[0].ino, 0);
        assert_eq!(entries[1].name, b"..");
        assert_eq!(entries[1].ino, 0);
    }

    #[test]
    fn test_mount_rejects_foreign_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-sffs.img");
        std::fs::write(&path, vec![0u8; 1 << 20]).unwrap();
        assert!(matches!(Sffs::mount(&path), Err(SffsError::Init(_))));
    }

    #[test]
    fn test_mkdir_getattr_readdir() {
        let (_dir, mut fs) = mounted_fs(52428800, 4096);

        let stat = fs.mkdir("/docs", 0o750).unwrap();
        assert_eq!(stat.mode, SFFS_IFDIR | 0o750);
        assert_eq!(stat.nlink, 2);

        let fetched = fs.getattr("/docs").unwrap();
        assert_eq!(fetched, stat);

        let names: Vec<_> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&b"docs".to_vec()));

        // nested directories resolve component by component
        fs.mkdir("/docs/notes", 0o755).unwrap();
        let notes = fs.getattr("/docs/notes").unwrap();
        let listed = fs.readdir("/docs").unwrap();
        assert!(listed.iter().any(|e| e.name == b"notes" && e.ino == notes.ino));

        // the parent picked up a link
        assert_eq!(fs.getattr("/docs").unwrap().nlink, 3);
    }

    #[test]
    fn test_mkdir_duplicate_and_missing_parent() {
        let (_dir, mut fs) = mounted_fs(52428800, 4096);
        fs.mkdir("/a", 0o755).unwrap();
        assert!(matches!(fs.mkdir("/a", 0o755), Err(SffsError::EntryExists)));
        assert!(matches!(
            fs.mkdir("/missing/b", 0o755),
            Err(SffsError::NoEntry)
        ));
    }

    #[test]
    fn test_getattr_missing_is_no_entry() {
        let (_dir, fs) = mounted_fs(52428800, 4096);
        assert!(matches!(fs.getattr("/nope"), Err(SffsError::NoEntry)));
    }

    #[test]
    fn test_statfs_reflects_mkdir() {
        let (_dir, mut fs) = mounted_fs(52428800, 4096);
        let before = fs.statfs().unwrap();
        assert_eq!(before.magic, SFFS_MAGIC);
        assert_eq!(before.block_size, 4096);

        fs.mkdir("/a", 0o755).unwrap();
        let after = fs.statfs().unwrap();
        assert_eq!(after.free_inodes, before.free_inodes - 1);
        assert_eq!(after.free_blocks, before.free_blocks - 1);
    }

    #[test]
    fn test_remount_preserves_the_tree() {
        let (dir, path) = fresh_image(52428800, 4096);
        {
            let mut fs = Sffs::mount(&path).unwrap();
            fs.mkdir("/kept", 0o700).unwrap();
            fs.unmount().unwrap();
        }
        let fs = Sffs::mount(&path).unwrap();
        assert_eq!(fs.sb.s_mount_count, 2);
        let stat = fs.getattr("/kept").unwrap();
        assert_eq!(stat.mode, SFFS_IFDIR | 0o700);
        drop(dir);
    }

    #[test]
    fn test_file_size_accounting() {
        let (_dir, mut fs) = mounted_fs(52428800, 4096);
        let ino = fs.alloc_inode().unwrap();
        let mut file = fs.creat_inode(ino, SFFS_IFREG | 0o644, 0).unwrap();
        fs.write_inode(&file).unwrap();
        fs.alloc_data_blocks(2, &mut file).unwrap();
        file.ino.i_bytes_rem = 100;
        fs.write_inode(&file).unwrap();

        let stat = fs.stat_of(&file);
        assert_eq!(stat.size, 4096 + 100);
        assert_eq!(stat.blocks, 2);
    }
}
