//! Directory blocks hold a chain of variable-length records terminated by a
//! sentinel whose `rec_len` runs to the end of the block. Record lengths
//! always add up to the block size.
//!
//! A record pointing at inode 0 is not necessarily the sentinel: the root
//! directory's `.` and `..` name inode 0 too. Sentinels are the records with
//! both a zero inode and a zero file type.

use crate::error::{SffsError, SffsResult};
use crate::fs::filekind::FileKind;
use crate::fs::fs_layout::Sffs;
use crate::fs::inode::InodeEntry;
use crate::fs::{
    blk32, ino32, SFFS_DIRENTRY_LENGTH, SFFS_GET_BLK_LT, SFFS_GET_BLK_RD, SFFS_MAX_DIR_ENTRY,
};

/// One directory record: `{ino_id, rec_len, file_type, name}`, packed,
/// name not NUL-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direntry {
    pub ino_id: ino32,
    pub rec_len: u16,
    pub file_type: u16,
    pub name: Vec<u8>,
}

/// Physical position of a record inside its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentryLocation {
    pub block_id: blk32,
    pub offset: u32,
    pub parent_ino: ino32,
}

impl Direntry {
    /// Build a record for `name` pointing at inode `ino_id`. The file type
    /// is the IFMT nibble of `mode`.
    pub fn new(ino_id: ino32, mode: u16, name: &[u8]) -> SffsResult<Direntry> {
        if name.is_empty() || name.contains(&b'/') || name.contains(&0) {
            return Err(SffsError::InvalidArgument("malformed entry name"));
        }
        if name.len() > (SFFS_MAX_DIR_ENTRY - SFFS_DIRENTRY_LENGTH) as usize {
            return Err(SffsError::InvalidArgument("entry name is too long"));
        }
        Ok(Direntry {
            ino_id,
            rec_len: SFFS_DIRENTRY_LENGTH + name.len() as u16,
            file_type: (mode >> 12) & 0xF,
            name: name.to_vec(),
        })
    }

    pub fn sentinel(rec_len: u16) -> Direntry {
        Direntry {
            ino_id: 0,
            rec_len,
            file_type: 0,
            name: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.ino_id == 0 && self.file_type == 0
    }

    fn encode_into(&self, block: &mut [u8], offset: usize) {
        block[offset..offset + 4].copy_from_slice(&self.ino_id.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&self.rec_len.to_le_bytes());
        block[offset + 6..offset + 8].copy_from_slice(&self.file_type.to_le_bytes());
        let name_at = offset + SFFS_DIRENTRY_LENGTH as usize;
        block[name_at..name_at + self.name.len()].copy_from_slice(&self.name);
    }
}

/// Decode the record starting at `offset`; the name is borrowed from the
/// block. For sentinels the name bytes are whatever the gap holds.
fn record_at(block: &[u8], offset: usize) -> SffsResult<(ino32, u16, u16, &[u8])> {
    let header = SFFS_DIRENTRY_LENGTH as usize;
    if offset + header > block.len() {
        return Err(SffsError::Corrupted("directory record past the block end"));
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&block[offset..offset + 4]);
    let ino_id = ino32::from_le_bytes(word);
    let mut half = [0u8; 2];
    half.copy_from_slice(&block[offset + 4..offset + 6]);
    let rec_len = u16::from_le_bytes(half);
    half.copy_from_slice(&block[offset + 6..offset + 8]);
    let file_type = u16::from_le_bytes(half);
    if (rec_len as usize) < header || offset + rec_len as usize > block.len() {
        return Err(SffsError::Corrupted("directory record length is invalid"));
    }
    Ok((
        ino_id,
        rec_len,
        file_type,
        &block[offset + header..offset + rec_len as usize],
    ))
}

impl Sffs {
    /// Format a fresh directory's first block with `.`, `..` and the
    /// terminating sentinel. Root passes no parent and points `..` at
    /// itself.
    pub(crate) fn init_direntry(
        &mut self,
        parent: Option<&InodeEntry>,
        child: &mut InodeEntry,
    ) -> SffsResult<()> {
        if child.ino.i_blks_count != 0 {
            return Err(SffsError::InvalidArgument("directory is already populated"));
        }

        self.alloc_data_blocks(1, child)?;
        let info = self.get_data_block_info(0, SFFS_GET_BLK_LT, child)?;

        let parent_ino = match parent {
            Some(entry) => &entry.ino,
            None => &child.ino,
        };
        let mut block = self.block_buf()?;
        let mut acc = 0usize;

        let dot = Direntry::new(child.ino.i_inode_num, child.ino.i_mode, b".")?;
        dot.encode_into(&mut block, acc);
        acc += dot.rec_len as usize;

        let dotdot = Direntry::new(parent_ino.i_inode_num, parent_ino.i_mode, b"..")?;
        dotdot.encode_into(&mut block, acc);
        acc += dotdot.rec_len as usize;

        let sentinel = Direntry::sentinel(self.sb.s_block_size as u16 - acc as u16);
        sentinel.encode_into(&mut block, acc);

        self.device.write_blk(info.block_id, &block)
    }

    /// Find `name` in `parent`. Absence is reported as [SffsError::NoEntry],
    /// distinct from real failures.
    pub(crate) fn lookup_direntry(
        &self,
        parent: &InodeEntry,
        name: &[u8],
    ) -> SffsResult<(Direntry, DirentryLocation)> {
        if !FileKind::is_dir(parent.ino.i_mode) {
            return Err(SffsError::InvalidArgument("lookup outside a directory"));
        }

        let block_size = self.sb.s_block_size as usize;
        for blk_n in 0..parent.ino.i_blks_count {
            let info = self.get_data_block_info(blk_n, SFFS_GET_BLK_RD, parent)?;
            let block = info
                .content
                .ok_or(SffsError::Corrupted("resolver returned no block content"))?;

            let mut offset = 0usize;
            while offset < block_size {
                let (ino_id, rec_len, file_type, rec_name) = record_at(&block, offset)?;
                if !(ino_id == 0 && file_type == 0) && rec_name == name {
                    return Ok((
                        Direntry {
                            ino_id,
                            rec_len,
                            file_type,
                            name: rec_name.to_vec(),
                        },
                        DirentryLocation {
                            block_id: info.block_id,
                            offset: offset as u32,
                            parent_ino: parent.ino.i_inode_num,
                        },
                    ));
                }
                offset += rec_len as usize;
            }
        }
        Err(SffsError::NoEntry)
    }

    /// Append a record to a directory, reusing a sentinel gap when one is
    /// large enough and extending the directory by one block otherwise.
    ///
    /// A gap only qualifies when it can keep a trailing sentinel of at least
    /// the header size behind the new record; the 8-byte sentinel that rule
    /// leaves behind is itself never consumed.
    pub(crate) fn add_direntry(
        &mut self,
        parent: &mut InodeEntry,
        rec: &Direntry,
    ) -> SffsResult<()> {
        match self.lookup_direntry(parent, &rec.name) {
            Ok(_) => return Err(SffsError::EntryExists),
            Err(SffsError::NoEntry) => {}
            Err(e) => return Err(e),
        }

        let block_size = self.sb.s_block_size as usize;
        for blk_n in 0..parent.ino.i_blks_count {
            let info = self.get_data_block_info(blk_n, SFFS_GET_BLK_RD, parent)?;
            let mut block = info
                .content
                .ok_or(SffsError::Corrupted("resolver returned no block content"))?;

            let mut offset = 0usize;
            while offset < block_size {
                let (ino_id, rec_len, file_type, _) = record_at(&block, offset)?;
                if ino_id == 0
                    && file_type == 0
                    && rec_len >= rec.rec_len + SFFS_DIRENTRY_LENGTH
                {
                    rec.encode_into(&mut block, offset);
                    Direntry::sentinel(rec_len - rec.rec_len)
                        .encode_into(&mut block, offset + rec.rec_len as usize);
                    return self.device.write_blk(info.block_id, &block);
                }
                offset += rec_len as usize;
            }
        }

        // every gap was too small: extend the directory by one block and
        // lay the record down at its start
        self.alloc_data_blocks(1, parent)?;
        let info = self.get_data_block_info(0, SFFS_GET_BLK_LT, parent)?;
        let mut block = self.block_buf()?;
        rec.encode_into(&mut block, 0);
        Direntry::sentinel(self.sb.s_block_size as u16 - rec.rec_len)
            .encode_into(&mut block, rec.rec_len as usize);
        self.device.write_blk(info.block_id, &block)
    }

    /// All named records of a directory, in on-disk order.
    pub(crate) fn read_dir(&self, dir: &InodeEntry) -> SffsResult<Vec<Direntry>> {
        if !FileKind::is_dir(dir.ino.i_mode) {
            return Err(SffsError::InvalidArgument("readdir outside a directory"));
        }

        let block_size = self.sb.s_block_size as usize;
        let mut entries = Vec::new();
        for blk_n in 0..dir.ino.i_blks_count {
            let info = self.get_data_block_info(blk_n, SFFS_GET_BLK_RD, dir)?;
            let block = info
                .content
                .ok_or(SffsError::Corrupted("resolver returned no block content"))?;

            let mut offset = 0usize;
            while offset < block_size {
                let (ino_id, rec_len, file_type, rec_name) = record_at(&block, offset)?;
                if !(ino_id == 0 && file_type == 0) {
                    entries.push(Direntry {
                        ino_id,
                        rec_len,
                        file_type,
                        name: rec_name.to_vec(),
                    });
                }
                offset += rec_len as usize;
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testutil::fresh_fs;
    use crate::fs::SFFS_IFDIR;

    fn make_dir(fs: &mut Sffs, ino: ino32, parent: Option<&InodeEntry>) -> InodeEntry {
        let mut entry = fs.creat_inode(ino, SFFS_IFDIR | 0o755, 0).unwrap();
        fs.write_inode(&entry).unwrap();
        fs.init_direntry(parent, &mut entry).unwrap();
        entry
    }

    #[test]
    fn test_init_builds_dot_entries() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let root = make_dir(&mut fs, 0, None);

        let entries = fs.read_dir(&root).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[0].ino_id, 0);
        assert_eq!(entries[0].rec_len, 9);
        assert_eq!(entries[1].name, b"..");
        assert_eq!(entries[1].ino_id, 0);
        assert_eq!(entries[1].rec_len, 10);

        // the sentinel covers the rest of the block
        let info = fs.get_data_block_info(0, SFFS_GET_BLK_RD, &root).unwrap();
        let block = info.content.unwrap();
        let (ino_id, rec_len, file_type, _) = record_at(&block, 19).unwrap();
        assert_eq!(ino_id, 0);
        assert_eq!(file_type, 0);
        assert_eq!(rec_len as usize, 4096 - 19);
    }

    #[test]
    fn test_child_dir_points_back_at_parent() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let root = make_dir(&mut fs, 0, None);
        let child = make_dir(&mut fs, 1, Some(&root));

        let entries = fs.read_dir(&child).unwrap();
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[0].ino_id, 1);
        assert_eq!(entries[1].name, b"..");
        assert_eq!(entries[1].ino_id, 0);
    }

    #[test]
    fn test_insert_then_lookup() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let mut root = make_dir(&mut fs, 0, None);

        let rec = Direntry::new(7, SFFS_IFDIR | 0o755, b"foo").unwrap();
        fs.add_direntry(&mut root, &rec).unwrap();

        let (found, location) = fs.lookup_direntry(&root, b"foo").unwrap();
        assert_eq!(found, rec);
        assert_eq!(location.offset, 19);
        assert_eq!(location.parent_ino, 0);

        assert!(matches!(
            fs.lookup_direntry(&root, b"bar"),
            Err(SffsError::NoEntry)
        ));
    }

    #[test]
    fn test_duplicate_insert_leaves_block_untouched() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let mut root = make_dir(&mut fs, 0, None);

        let rec = Direntry::new(7, SFFS_IFDIR | 0o755, b"foo").unwrap();
        fs.add_direntry(&mut root, &rec).unwrap();
        let before = fs
            .get_data_block_info(0, SFFS_GET_BLK_RD, &root)
            .unwrap()
            .content
            .unwrap();

        let other = Direntry::new(8, SFFS_IFDIR | 0o755, b"foo").unwrap();
        assert!(matches!(
            fs.add_direntry(&mut root, &other),
            Err(SffsError::EntryExists)
        ));

        let after = fs
            .get_data_block_info(0, SFFS_GET_BLK_RD, &root)
            .unwrap()
            .content
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dot_entries_survive_inserts() {
        // root's `.` and `..` carry inode 0 but are no sentinels and must
        // never be overwritten by an insertion
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let mut root = make_dir(&mut fs, 0, None);

        let rec = Direntry::new(3, SFFS_IFDIR | 0o755, b"x").unwrap();
        fs.add_direntry(&mut root, &rec).unwrap();

        let entries = fs.read_dir(&root).unwrap();
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].name, b"..");
        assert_eq!(entries[2].name, b"x");
    }

    #[test]
    fn test_minimal_tail_sentinel_is_not_consumed() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let mut root = make_dir(&mut fs, 0, None);

        // sixteen records of 253 bytes and one of 21 leave a bare 8-byte
        // sentinel at the end of the block
        for i in 0u32..16 {
            let name = vec![b'a' + i as u8; 245];
            let rec = Direntry::new(50 + i, SFFS_IFDIR | 0o755, &name).unwrap();
            fs.add_direntry(&mut root, &rec).unwrap();
        }
        let rec = Direntry::new(70, SFFS_IFDIR | 0o755, &[b'z'; 13]).unwrap();
        fs.add_direntry(&mut root, &rec).unwrap();
        assert_eq!(root.ino.i_blks_count, 1);

        let info = fs.get_data_block_info(0, SFFS_GET_BLK_RD, &root).unwrap();
        let block = info.content.unwrap();
        let (ino_id, rec_len, file_type, _) = record_at(&block, 4096 - 8).unwrap();
        assert_eq!((ino_id, rec_len, file_type), (0, 8, 0));

        // the bare sentinel cannot host another record; the directory grows
        let rec = Direntry::new(71, SFFS_IFDIR | 0o755, b"straggler").unwrap();
        fs.add_direntry(&mut root, &rec).unwrap();
        assert_eq!(root.ino.i_blks_count, 2);
    }

    #[test]
    fn test_rejects_oversized_names() {
        assert!(Direntry::new(1, SFFS_IFDIR, &[b'a'; 249]).is_err());
        assert!(Direntry::new(1, SFFS_IFDIR, &[b'a'; 248]).is_ok());
        assert!(Direntry::new(1, SFFS_IFDIR, b"").is_err());
        assert!(Direntry::new(1, SFFS_IFDIR, b"a/b").is_err());
    }

    #[test]
    fn test_full_block_extends_the_directory() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let mut root = make_dir(&mut fs, 0, None);

        for i in 0u32..280 {
            let name = format!("file{i:03}");
            let rec = Direntry::new(100 + i, SFFS_IFDIR | 0o755, name.as_bytes()).unwrap();
            fs.add_direntry(&mut root, &rec).unwrap();
        }

        assert_eq!(root.ino.i_blks_count, 2);
        let entries = fs.read_dir(&root).unwrap();
        assert_eq!(entries.len(), 282);
        assert!(fs.lookup_direntry(&root, b"file000").is_ok());
        assert!(fs.lookup_direntry(&root, b"file279").is_ok());
    }
}
