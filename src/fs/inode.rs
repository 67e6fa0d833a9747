//! The Global Inode Table and its records.
//!
//! SFFS differentiates between an inode record and a table entry: one entry
//! is a record followed by its data-pointer area, and the entry size is what
//! the table is sliced by. A file is a singly linked list of entries; the
//! primary carries the full record, supplementary entries carry an 8-byte
//! header and a longer pointer array.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::error::{SffsError, SffsResult};
use crate::fs::filekind::FileKind;
use crate::fs::fs_layout::Sffs;
use crate::fs::{blk32, ino32};
use crate::utils::disk_serialize::DiskSerialize;
use crate::utils::time_util;

/// On-disk inode record, REV. 1. 128 bytes, packed, little-endian.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Inode number
    pub i_inode_num: ino32,
    /// Next entry in this file's inode list, 0 terminates
    pub i_next_entry: u32,
    /// Records in this file's list including the primary
    pub i_list_size: u32,
    /// Number of the last record in the list
    pub i_last_lentry: ino32,
    /// Owner ID
    pub i_uid_owner: u32,
    /// Owner group ID
    pub i_gid_owner: u32,
    /// File system specific flags
    pub i_flags: u32,
    /// File size in blocks
    pub i_blks_count: u32,
    /// Bytes used in the last block
    pub i_bytes_rem: u16,
    /// File type and permissions
    pub i_mode: u16,
    /// Link count
    pub i_link_count: u16,
    /// Access time
    pub i_acc_time: u64,
    /// Change time
    pub i_chg_time: u64,
    /// Modification time
    pub i_mod_time: u64,
    /// Creation time
    pub i_crt_time: u64,
    /// Reserved for future use
    #[serde(with = "BigArray")]
    pub i_reserved: [u8; 58],
}

impl DiskSerialize for Inode {}

impl Default for Inode {
    fn default() -> Self {
        Inode {
            i_inode_num: 0,
            i_next_entry: 0,
            i_list_size: 1,
            i_last_lentry: 0,
            i_uid_owner: 0,
            i_gid_owner: 0,
            i_flags: 0,
            i_blks_count: 0,
            i_bytes_rem: 0,
            i_mode: 0,
            i_link_count: 0,
            i_acc_time: 0,
            i_chg_time: 0,
            i_mod_time: 0,
            i_crt_time: 0,
            i_reserved: [0u8; 58],
        }
    }
}

impl Inode {
    pub fn touch_modified(&mut self) {
        let now = time_util::epoch_secs();
        self.i_mod_time = now;
        self.i_chg_time = now;
    }
}

/// A primary record together with its data-pointer area, the unit the table
/// stores. The pointer vec is sized from the superblock at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEntry {
    pub ino: Inode,
    pub blks: Vec<blk32>,
}

/// A supplementary list record: short header, the rest of the slot is
/// pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeListEntry {
    pub i_inode_num: ino32,
    pub i_next_entry: u32,
    pub blks: Vec<blk32>,
}

impl Sffs {
    /// Populate a fresh in-memory inode. The mode must carry exactly one
    /// file-type bit; nothing is written to the table here.
    pub(crate) fn creat_inode(
        &self,
        ino_id: ino32,
        mode: u16,
        flags: u32,
    ) -> SffsResult<InodeEntry> {
        FileKind::from_mode(mode)?;

        let now = time_util::epoch_secs();
        let ino = Inode {
            i_inode_num: ino_id,
            i_next_entry: 0,
            i_list_size: 1,
            i_last_lentry: ino_id,
            i_uid_owner: users::get_effective_uid(),
            i_gid_owner: users::get_effective_gid(),
            i_flags: flags,
            i_blks_count: 0,
            i_bytes_rem: 0,
            i_mode: mode,
            i_link_count: 1,
            i_acc_time: now,
            i_chg_time: now,
            i_mod_time: now,
            i_crt_time: now,
            i_reserved: [0u8; 58],
        };
        Ok(InodeEntry {
            ino,
            blks: vec![0; self.sb.primary_ptrs() as usize],
        })
    }

    /// Serialize a primary entry into its table slot. For an entry whose
    /// bitmap bit is still clear this is a creation: the table is written
    /// first, then the free counter drops, then the bit is set, so a failure
    /// in between leaves a slot the next scan will simply overwrite.
    pub(crate) fn write_inode(&mut self, entry: &InodeEntry) -> SffsResult<()> {
        let ino_id = entry.ino.i_inode_num;
        let (table_blk, offset) = self.git_slot(ino_id)?;

        let record = DiskSerialize::serialize(&entry.ino)?;
        if record.len() != self.sb.s_inode_size as usize
            || entry.blks.len() != self.sb.primary_ptrs() as usize
        {
            return Err(SffsError::Corrupted("inode entry has a foreign geometry"));
        }

        let mut cache = self.block_buf()?;
        self.device
            .read_blk(self.sb.s_git_start + table_blk, &mut cache)?;
        cache[offset..offset + record.len()].copy_from_slice(&record);
        let mut at = offset + record.len();
        for blk in &entry.blks {
            cache[at..at + 4].copy_from_slice(&blk.to_le_bytes());
            at += 4;
        }
        self.device
            .write_blk(self.sb.s_git_start + table_blk, &cache)?;

        if !self.check_git_bm(ino_id)? {
            self.sb.s_free_inodes_count -= 1;
            self.set_git_bm(ino_id)?;
        }
        Ok(())
    }

    /// Read a primary entry; an inode whose bitmap bit is clear does not
    /// exist.
    pub(crate) fn read_inode(&self, ino_id: ino32) -> SffsResult<InodeEntry> {
        if !self.check_git_bm(ino_id)? {
            return Err(SffsError::NoEntry);
        }

        let (table_blk, offset) = self.git_slot(ino_id)?;
        let mut cache = self.block_buf()?;
        self.device
            .read_blk(self.sb.s_git_start + table_blk, &mut cache)?;

        let record_len = self.sb.s_inode_size as usize;
        let (ino, _) = <Inode as DiskSerialize>::deserialize(&cache[offset..offset + record_len])?;
        let mut blks = Vec::with_capacity(self.sb.primary_ptrs() as usize);
        let mut at = offset + record_len;
        for _ in 0..self.sb.primary_ptrs() {
            let mut word = [0u8; 4];
            word.copy_from_slice(&cache[at..at + 4]);
            blks.push(blk32::from_le_bytes(word));
            at += 4;
        }
        Ok(InodeEntry { ino, blks })
    }

    /// First clear bit of the GIT bitmap past the reserved range.
    pub(crate) fn alloc_inode(&self) -> SffsResult<ino32> {
        let bits_per_block = self.sb.s_block_size as usize * 8;
        let mut cache = self.block_buf()?;

        for bm_block in 0..self.sb.s_git_bitmap_size {
            self.device
                .read_blk(self.sb.s_git_bitmap_start + bm_block, &mut cache)?;
            let base = bm_block as usize * bits_per_block;
            for zero in cache.view_bits::<Lsb0>().iter_zeros() {
                let ino = (base + zero) as ino32;
                if ino < self.sb.s_inodes_reserved {
                    continue;
                }
                if ino >= self.sb.s_inodes_count {
                    break;
                }
                return Ok(ino);
            }
        }
        Err(SffsError::NoSpace)
    }

    /// Read a supplementary record. The caller got the number by following a
    /// chain, so a clear bitmap bit here means the chain is broken.
    pub(crate) fn read_list_entry(&self, ino_id: ino32) -> SffsResult<InodeListEntry> {
        if !self.check_git_bm(ino_id)? {
            return Err(SffsError::Corrupted("inode list points to a free entry"));
        }

        let (table_blk, offset) = self.git_slot(ino_id)?;
        let mut cache = self.block_buf()?;
        self.device
            .read_blk(self.sb.s_git_start + table_blk, &mut cache)?;

        let mut word = [0u8; 4];
        word.copy_from_slice(&cache[offset..offset + 4]);
        let i_inode_num = ino32::from_le_bytes(word);
        word.copy_from_slice(&cache[offset + 4..offset + 8]);
        let i_next_entry = u32::from_le_bytes(word);

        let mut blks = Vec::with_capacity(self.sb.supp_ptrs() as usize);
        let mut at = offset + 8;
        for _ in 0..self.sb.supp_ptrs() {
            word.copy_from_slice(&cache[at..at + 4]);
            blks.push(blk32::from_le_bytes(word));
            at += 4;
        }
        Ok(InodeListEntry {
            i_inode_num,
            i_next_entry,
            blks,
        })
    }

    /// Serialize a supplementary record into its slot, with the same
    /// table / counter / bitmap ordering as [`write_inode`](Sffs::write_inode).
    pub(crate) fn write_list_entry(&mut self, entry: &InodeListEntry) -> SffsResult<()> {
        if entry.blks.len() != self.sb.supp_ptrs() as usize {
            return Err(SffsError::Corrupted("list entry has a foreign geometry"));
        }
        let (table_blk, offset) = self.git_slot(entry.i_inode_num)?;

        let mut cache = self.block_buf()?;
        self.device
            .read_blk(self.sb.s_git_start + table_blk, &mut cache)?;
        cache[offset..offset + 4].copy_from_slice(&entry.i_inode_num.to_le_bytes());
        cache[offset + 4..offset + 8].copy_from_slice(&entry.i_next_entry.to_le_bytes());
        let mut at = offset + 8;
        for blk in &entry.blks {
            cache[at..at + 4].copy_from_slice(&blk.to_le_bytes());
            at += 4;
        }
        self.device
            .write_blk(self.sb.s_git_start + table_blk, &cache)?;

        if !self.check_git_bm(entry.i_inode_num)? {
            self.sb.s_free_inodes_count -= 1;
            self.set_git_bm(entry.i_inode_num)?;
        }
        Ok(())
    }

    /// Return an inode number to the free pool. Callers are responsible for
    /// having released the file's blocks and directory entry first.
    pub fn release_inode(&mut self, ino_id: ino32) -> SffsResult<()> {
        self.clear_git_bm(ino_id)?;
        self.sb.s_free_inodes_count += 1;
        Ok(())
    }

    /// Table block and in-block byte offset of an inode's slot.
    fn git_slot(&self, ino_id: ino32) -> SffsResult<(blk32, usize)> {
        if ino_id >= self.sb.s_inodes_count {
            return Err(SffsError::InvalidArgument("inode number out of range"));
        }
        let per_block = self.sb.inodes_per_block();
        let offset = (ino_id % per_block) * self.sb.entry_size();
        Ok((ino_id / per_block, offset as usize))
    }
}
