//! Growing files: the inode-list allocator, the data-block allocator and the
//! block-index resolver.
//!
//! Data blocks are handed out in three steps, each tried in order until the
//! request is filled: extend the group the file ends in, consume entirely
//! free groups, then fall back to a linear bitmap scan. The commit publishes
//! bitmap bits first and pointer slots second, so a half-failed call can roll
//! its bits back without ever leaving the file pointing at a block that
//! reads as free.

use log::{debug, error};

use crate::error::{SffsError, SffsResult};
use crate::fs::filekind::FileKind;
use crate::fs::fs_layout::Sffs;
use crate::fs::inode::{InodeEntry, InodeListEntry};
use crate::fs::{blk32, bmap_t, ino32, SFFS_GET_BLK_LT, SFFS_GET_BLK_RD};
use bitvec::prelude::*;

/// Basic information about one pointer slot of a file, and optionally the
/// block content behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlockInfo {
    /// Number of the list record that holds this slot
    pub inode_id: ino32,
    /// Absolute block ID stored in the slot
    pub block_id: blk32,
    /// Slot index within the owning record's pointer area
    pub list_id: u32,
    /// Block content, when requested
    pub content: Option<Vec<u8>>,
}

impl Sffs {
    /// Resolve logical block `block_number` of a file to its pointer slot.
    ///
    /// `SFFS_GET_BLK_LT` substitutes the file's last block for
    /// `block_number`; for an empty file the result is defined but the block
    /// ID is meaningless. `SFFS_GET_BLK_RD` also fetches the block content.
    pub(crate) fn get_data_block_info(
        &self,
        block_number: blk32,
        flags: u32,
        entry: &InodeEntry,
    ) -> SffsResult<DataBlockInfo> {
        let n = if flags & SFFS_GET_BLK_LT != 0 {
            entry.ino.i_blks_count.saturating_sub(1)
        } else {
            if block_number >= entry.ino.i_blks_count {
                return Err(SffsError::InvalidArgument(
                    "logical block is beyond the file",
                ));
            }
            block_number
        };

        let p = self.sb.primary_ptrs();
        let (inode_id, block_id, list_id) = if n < p {
            (entry.ino.i_inode_num, entry.blks[n as usize], n)
        } else {
            let q = self.sb.supp_ptrs();
            let m = n - p;
            let hops = m / q;
            let slot = m % q;

            let mut cur = entry.ino.i_next_entry;
            if cur == 0 {
                return Err(SffsError::Corrupted("inode list ends before the block"));
            }
            let mut node = self.read_list_entry(cur)?;
            for _ in 0..hops {
                cur = node.i_next_entry;
                if cur == 0 {
                    return Err(SffsError::Corrupted("inode list ends before the block"));
                }
                node = self.read_list_entry(cur)?;
            }
            (cur, node.blks[slot as usize], slot)
        };

        let content = if flags & SFFS_GET_BLK_RD != 0 && entry.ino.i_blks_count > 0 {
            let mut buf = self.block_buf()?;
            self.device.read_blk(block_id, &mut buf)?;
            Some(buf)
        } else {
            None
        };

        Ok(DataBlockInfo {
            inode_id,
            block_id,
            list_id,
            content,
        })
    }

    /// Append `size` supplementary records to a file's inode list.
    ///
    /// Slots right after the current tail are preferred, as long as they are
    /// free and the run stays inside one table block; otherwise any free
    /// slots found by a scan are used.
    pub(crate) fn alloc_inode_list(&mut self, size: u32, entry: &mut InodeEntry) -> SffsResult<()> {
        if size == 0 {
            return Err(SffsError::InvalidArgument("empty inode list request"));
        }
        let cap = self.sb.s_max_inode_list;
        if cap != 0 && entry.ino.i_list_size + size > cap {
            return Err(SffsError::NoSpace);
        }
        if self.sb.s_free_inodes_count < size {
            return Err(SffsError::NoSpace);
        }

        let slots = self.pick_list_slots(size, entry)?;

        for (i, &slot) in slots.iter().enumerate() {
            let stub = InodeListEntry {
                i_inode_num: slot,
                i_next_entry: slots.get(i + 1).copied().unwrap_or(0),
                blks: vec![0; self.sb.supp_ptrs() as usize],
            };
            self.write_list_entry(&stub)?;
        }

        // splice the new run onto the current tail
        if entry.ino.i_last_lentry == entry.ino.i_inode_num {
            entry.ino.i_next_entry = slots[0];
        } else {
            let mut tail = self.read_list_entry(entry.ino.i_last_lentry)?;
            tail.i_next_entry = slots[0];
            self.write_list_entry(&tail)?;
        }
        entry.ino.i_list_size += size;
        entry.ino.i_last_lentry = slots[size as usize - 1];
        self.write_inode(entry)?;

        debug!(
            "inode {} list grew by {size} to tail {}",
            entry.ino.i_inode_num, entry.ino.i_last_lentry
        );
        Ok(())
    }

    fn pick_list_slots(&self, size: u32, entry: &InodeEntry) -> SffsResult<Vec<ino32>> {
        let per_block = self.sb.inodes_per_block();
        let last = entry.ino.i_last_lentry;

        let sequential = last % per_block + size <= per_block
            && last + size < self.sb.s_inodes_count;
        if sequential {
            let mut all_clear = true;
            for candidate in last + 1..=last + size {
                if self.check_git_bm(candidate)? {
                    all_clear = false;
                    break;
                }
            }
            if all_clear {
                return Ok((last + 1..=last + size).collect());
            }
        }
        self.scan_git_free(size as usize)
    }

    fn scan_git_free(&self, want: usize) -> SffsResult<Vec<ino32>> {
        let bits_per_block = self.sb.s_block_size as usize * 8;
        let mut cache = self.block_buf()?;
        let mut slots = Vec::with_capacity(want);

        'blocks: for bm_block in 0..self.sb.s_git_bitmap_size {
            self.device
                .read_blk(self.sb.s_git_bitmap_start + bm_block, &mut cache)?;
            let base = bm_block as usize * bits_per_block;
            for zero in cache.view_bits::<Lsb0>().iter_zeros() {
                let ino = (base + zero) as ino32;
                // 0 terminates a chain, so it can never be a list slot
                if ino == 0 || ino < self.sb.s_inodes_reserved {
                    continue;
                }
                if ino >= self.sb.s_inodes_count {
                    break 'blocks;
                }
                slots.push(ino);
                if slots.len() == want {
                    return Ok(slots);
                }
            }
        }
        Err(SffsError::NoSpace)
    }

    /// Allocate `blk_count` data blocks and append them to the file.
    pub(crate) fn alloc_data_blocks(
        &mut self,
        blk_count: u32,
        entry: &mut InodeEntry,
    ) -> SffsResult<()> {
        if blk_count == 0 {
            return Err(SffsError::InvalidArgument("empty data block request"));
        }
        if blk_count > self.sb.s_free_blocks_count {
            return Err(SffsError::NoSpace);
        }

        // preallocation boost, clipped back when it does not fit
        let boost = if FileKind::is_reg(entry.ino.i_mode) {
            self.sb.s_prealloc_blocks
        } else if FileKind::is_dir(entry.ino.i_mode) {
            self.sb.s_prealloc_dir_blocks
        } else {
            0
        };
        let mut requested = blk_count + boost;
        if requested > self.sb.s_free_blocks_count {
            requested = blk_count;
        }

        // make sure the list carries enough pointer slots
        let free_slots = self.sb.ptr_capacity(entry.ino.i_list_size) - entry.ino.i_blks_count;
        if free_slots < requested {
            let deficit = requested - free_slots;
            self.alloc_inode_list(deficit.div_ceil(self.sb.supp_ptrs()), entry)?;
        }

        let (chosen, allocated_grps) = self.pick_data_blocks(requested, entry)?;

        // phase A: publish the bitmap bits
        for (i, &rel) in chosen.iter().enumerate() {
            if let Err(e) = self.set_data_bm(rel) {
                self.rollback_data_bits(&chosen[..i]);
                return Err(e);
            }
        }

        // phase B: register the IDs in the pointer slots, tail first in the
        // primary, then along the supplementary chain
        let saved = entry.clone();
        if let Err(e) = self.register_blocks(&chosen, entry) {
            *entry = saved;
            self.rollback_data_bits(&chosen);
            return Err(e);
        }

        self.sb.s_free_blocks_count -= chosen.len() as u32;
        self.sb.s_free_groups -= allocated_grps;
        Ok(())
    }

    /// Select `requested` free data-relative block IDs: extend the last
    /// group, then consume fresh groups, then scan.
    fn pick_data_blocks(
        &self,
        requested: u32,
        entry: &InodeEntry,
    ) -> SffsResult<(Vec<bmap_t>, u32)> {
        let data_total = self.sb.data_blocks();
        let bpg = self.sb.s_blocks_per_group;
        let mut chosen: Vec<bmap_t> = Vec::new();
        chosen
            .try_reserve(requested as usize)
            .map_err(|_| SffsError::MemAlloc)?;

        // step 1: keep filling the group the file currently ends in
        let (group, start) = if entry.ino.i_blks_count == 0 {
            (0, 0)
        } else {
            let info = self.get_data_block_info(0, SFFS_GET_BLK_LT, entry)?;
            let rel = self.device.abs_to_data(info.block_id);
            (rel / bpg, rel % bpg + 1)
        };
        let word = self.read_group_word(group)?;
        for bit in start..bpg {
            if chosen.len() as u32 == requested {
                break;
            }
            let rel = group * bpg + bit;
            if rel >= data_total {
                break;
            }
            if word & (1u64 << bit) == 0 {
                chosen.push(rel);
            }
        }

        // step 2: entirely free groups
        let mut allocated_grps = 0;
        for fresh in 0..self.sb.s_group_count {
            if chosen.len() as u32 == requested {
                break;
            }
            let lo = fresh * bpg;
            if chosen.iter().any(|&c| c >= lo && c < lo + bpg) {
                continue;
            }
            if self.read_group_word(fresh)? != 0 {
                continue;
            }
            let before = chosen.len();
            for bit in 0..bpg {
                if chosen.len() as u32 == requested {
                    break;
                }
                let rel = lo + bit;
                if rel >= data_total {
                    break;
                }
                chosen.push(rel);
            }
            if chosen.len() > before {
                allocated_grps += 1;
            }
        }

        // step 3: take anything the bitmap still has
        if (chosen.len() as u32) < requested {
            let bits_per_block = self.sb.s_block_size as usize * 8;
            let mut cache = self.block_buf()?;
            'scan: for bm_block in 0..self.sb.s_data_bitmap_size {
                self.device
                    .read_blk(self.sb.s_data_bitmap_start + bm_block, &mut cache)?;
                let base = bm_block as usize * bits_per_block;
                for zero in cache.view_bits::<Lsb0>().iter_zeros() {
                    let rel = (base + zero) as bmap_t;
                    if rel >= data_total {
                        break 'scan;
                    }
                    if chosen.contains(&rel) {
                        continue;
                    }
                    chosen.push(rel);
                    if chosen.len() as u32 == requested {
                        break 'scan;
                    }
                }
            }
        }

        if (chosen.len() as u32) < requested {
            return Err(SffsError::Corrupted(
                "free block count disagrees with the data bitmap",
            ));
        }
        Ok((chosen, allocated_grps))
    }

    fn register_blocks(&mut self, chosen: &[bmap_t], entry: &mut InodeEntry) -> SffsResult<()> {
        let p = self.sb.primary_ptrs() as usize;
        let q = self.sb.supp_ptrs() as usize;

        let mut slot = entry.ino.i_blks_count as usize;
        let mut remaining: &[bmap_t] = chosen;

        while slot < p && !remaining.is_empty() {
            entry.blks[slot] = self.device.data_to_abs(remaining[0]);
            slot += 1;
            remaining = &remaining[1..];
        }

        let mut cur = entry.ino.i_next_entry;
        let mut node_index = 0;
        while !remaining.is_empty() {
            if cur == 0 {
                return Err(SffsError::Corrupted("inode list shorter than its capacity"));
            }
            let mut node = self.read_list_entry(cur)?;
            if node_index < (slot - p) / q {
                cur = node.i_next_entry;
                node_index += 1;
                continue;
            }
            let mut off = (slot - p) % q;
            while off < q && !remaining.is_empty() {
                node.blks[off] = self.device.data_to_abs(remaining[0]);
                off += 1;
                slot += 1;
                remaining = &remaining[1..];
            }
            self.write_list_entry(&node)?;
            cur = node.i_next_entry;
            node_index += 1;
        }

        entry.ino.i_blks_count += chosen.len() as u32;
        entry.ino.touch_modified();
        self.write_inode(entry)
    }

    /// Return data blocks to the free pool by their absolute IDs, the way
    /// pointer slots store them. Pointer-slot cleanup is the caller's job.
    pub fn release_data_blocks(&mut self, blocks: &[blk32]) -> SffsResult<()> {
        for &block in blocks {
            self.clear_data_bm(self.device.abs_to_data(block))?;
        }
        self.sb.s_free_blocks_count += blocks.len() as u32;
        Ok(())
    }

    fn rollback_data_bits(&mut self, bits: &[bmap_t]) {
        for &rel in bits {
            if let Err(e) = self.clear_data_bm(rel) {
                error!("bitmap rollback failed for data block {rel}: {e}");
            }
        }
    }
}
