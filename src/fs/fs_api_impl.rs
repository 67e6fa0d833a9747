//! FUSE bridge. Translates the kernel's inode-based calls onto the core;
//! FUSE numbers its root 1 while the on-disk root is inode 0, so bridge
//! inode numbers are shifted by one.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use fuser::{FileAttr, Filesystem, ReplyAttr, ReplyDirectory, ReplyEntry, ReplyStatfs, Request};
use log::{error, info};

use crate::error::SffsResult;
use crate::fs::filekind::{direntry_file_type, FileKind};
use crate::fs::fs_layout::Sffs;
use crate::fs::inode::InodeEntry;
use crate::fs::ino32;
use crate::utils::time_util;

const TTL: Duration = Duration::new(0, 0);

fn to_bridge(ino: ino32) -> u64 {
    ino as u64 + 1
}

fn from_bridge(ino: u64) -> Option<ino32> {
    ino.checked_sub(1).map(|n| n as ino32)
}

impl Sffs {
    fn file_attr(&self, entry: &InodeEntry) -> FileAttr {
        let stat = self.stat_of(entry);
        let kind = match FileKind::from_mode(stat.mode) {
            Ok(kind) => kind.into(),
            Err(_) => fuser::FileType::RegularFile,
        };
        FileAttr {
            ino: to_bridge(stat.ino),
            size: stat.size,
            blocks: stat.blocks as u64,
            atime: time_util::system_time(stat.atime),
            mtime: time_util::system_time(stat.mtime),
            ctime: time_util::system_time(stat.ctime),
            crtime: time_util::system_time(stat.crtime),
            kind,
            perm: stat.mode & 0o7777,
            nlink: stat.nlink as u32,
            uid: stat.uid,
            gid: stat.gid,
            rdev: 0,
            blksize: self.sb.s_block_size,
            flags: 0,
        }
    }

    fn bridge_inode(&self, ino: u64) -> SffsResult<InodeEntry> {
        let ino = from_bridge(ino).ok_or(crate::error::SffsError::NoEntry)?;
        self.read_inode(ino)
    }
}

impl Filesystem for Sffs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.sb.s_state = 0;
        self.sb.s_write_time = time_util::low_precision_now();
        if let Err(e) = self.sb.write_to(&self.device) {
            error!("superblock flush on unmount failed: {e}");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        info!("lookup() of {name:?} under {parent}");
        let result = self.bridge_inode(parent).and_then(|parent| {
            let (record, _) = self.lookup_direntry(&parent, name.as_bytes())?;
            self.read_inode(record.ino_id)
        });
        match result {
            Ok(entry) => reply.entry(&TTL, &self.file_attr(&entry), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        info!("getattr() of inode {ino}");
        match self.bridge_inode(ino) {
            Ok(entry) => reply.attr(&TTL, &self.file_attr(&entry)),
            Err(e) => reply.error(e.errno()),
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
        info!("readdir() of inode {ino} from offset {offset}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let records = match self.bridge_inode(ino).and_then(|dir| self.read_dir(&dir)) {
            Ok(records) => records,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        for (i, record) in records.into_iter().enumerate().skip(offset as usize) {
            let full = reply.add(
                to_bridge(record.ino_id),
                i as i64 + 1,
                direntry_file_type(record.file_type),
                OsStr::from_bytes(&record.name),
            );
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        info!("mkdir() of {name:?} under {parent}");
        let result = self.bridge_inode(parent).and_then(|mut parent| {
            self.mkdir_at(&mut parent, name.as_bytes(), mode as u16)
        });
        match result {
            Ok(child) => reply.entry(&TTL, &self.file_attr(&child), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.statfs() {
            Ok(stats) => reply.statfs(
                stats.blocks as u64,
                stats.free_blocks as u64,
                stats.free_blocks as u64,
                stats.inodes as u64,
                stats.free_inodes as u64,
                stats.block_size,
                255,
                stats.block_size,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_inode_numbering() {
        assert_eq!(to_bridge(0), 1);
        assert_eq!(from_bridge(1), Some(0));
        assert_eq!(from_bridge(0), None);
    }
}
