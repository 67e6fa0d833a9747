//! Per-bit handlers for the two allocation bitmaps. Bit `k` lives at byte
//! `k / 8` within block `bm_start + (k / 8) / block_size`; bits are numbered
//! LSB-first within a byte.

use bitvec::prelude::*;

use crate::error::{SffsError, SffsResult};
use crate::fs::fs_layout::Sffs;
use crate::fs::{blk32, bmap_t};

impl Sffs {
    pub(crate) fn check_data_bm(&self, id: bmap_t) -> SffsResult<bool> {
        self.check_bm(self.sb.s_data_bitmap_start, id, self.sb.data_blocks())
    }

    pub(crate) fn set_data_bm(&mut self, id: bmap_t) -> SffsResult<()> {
        self.set_bm(self.sb.s_data_bitmap_start, id, self.sb.data_blocks())
    }

    pub(crate) fn clear_data_bm(&mut self, id: bmap_t) -> SffsResult<()> {
        self.clear_bm(self.sb.s_data_bitmap_start, id, self.sb.data_blocks())
    }

    pub(crate) fn check_git_bm(&self, id: bmap_t) -> SffsResult<bool> {
        self.check_bm(self.sb.s_git_bitmap_start, id, self.sb.s_inodes_count)
    }

    pub(crate) fn set_git_bm(&mut self, id: bmap_t) -> SffsResult<()> {
        self.set_bm(self.sb.s_git_bitmap_start, id, self.sb.s_inodes_count)
    }

    pub(crate) fn clear_git_bm(&mut self, id: bmap_t) -> SffsResult<()> {
        self.clear_bm(self.sb.s_git_bitmap_start, id, self.sb.s_inodes_count)
    }

    /// One machine word of the data bitmap, aligned to `s_blocks_per_group`,
    /// covering block group `group`. A zero word means the group is entirely
    /// free.
    pub(crate) fn read_group_word(&self, group: u32) -> SffsResult<u64> {
        let word_bytes = self.sb.s_blocks_per_group / 8;
        let byte_id = group * word_bytes;
        if byte_id + word_bytes > self.sb.s_data_bitmap_size * self.sb.s_block_size {
            return Err(SffsError::InvalidArgument("group index out of range"));
        }

        let mut cache = self.block_buf()?;
        let bm_block = byte_id / self.sb.s_block_size;
        let offset = (byte_id % self.sb.s_block_size) as usize;
        self.device
            .read_blk(self.sb.s_data_bitmap_start + bm_block, &mut cache)?;

        let mut word = [0u8; 8];
        word.copy_from_slice(&cache[offset..offset + 8]);
        Ok(u64::from_le_bytes(word))
    }

    fn check_bm(&self, bm_start: blk32, id: bmap_t, limit: u32) -> SffsResult<bool> {
        let (bm_block, byte, bit) = bit_location(id, self.sb.s_block_size, limit)?;
        let mut cache = self.block_buf()?;
        self.device.read_blk(bm_start + bm_block, &mut cache)?;
        Ok(cache.view_bits::<Lsb0>()[byte * 8 + bit])
    }

    /// Setting a bit that is already set signals corruption.
    fn set_bm(&mut self, bm_start: blk32, id: bmap_t, limit: u32) -> SffsResult<()> {
        let (bm_block, byte, bit) = bit_location(id, self.sb.s_block_size, limit)?;
        let mut cache = self.block_buf()?;
        self.device.read_blk(bm_start + bm_block, &mut cache)?;

        let bits = cache.view_bits_mut::<Lsb0>();
        if bits[byte * 8 + bit] {
            return Err(SffsError::Corrupted("bitmap bit is already set"));
        }
        bits.set(byte * 8 + bit, true);
        self.device.write_blk(bm_start + bm_block, &cache)
    }

    /// Clearing is unconditional.
    fn clear_bm(&mut self, bm_start: blk32, id: bmap_t, limit: u32) -> SffsResult<()> {
        let (bm_block, byte, bit) = bit_location(id, self.sb.s_block_size, limit)?;
        let mut cache = self.block_buf()?;
        self.device.read_blk(bm_start + bm_block, &mut cache)?;
        cache.view_bits_mut::<Lsb0>().set(byte * 8 + bit, false);
        self.device.write_blk(bm_start + bm_block, &cache)
    }
}

fn bit_location(id: bmap_t, block_size: u32, limit: u32) -> SffsResult<(blk32, usize, usize)> {
    if id >= limit {
        return Err(SffsError::InvalidArgument("bitmap index out of range"));
    }
    let byte_id = id / 8;
    let bm_block = byte_id / block_size;
    Ok((bm_block, (byte_id % block_size) as usize, (id % 8) as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testutil::fresh_fs;

    #[test]
    fn test_set_check_clear() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);

        assert!(!fs.check_data_bm(17).unwrap());
        fs.set_data_bm(17).unwrap();
        assert!(fs.check_data_bm(17).unwrap());
        fs.clear_data_bm(17).unwrap();
        assert!(!fs.check_data_bm(17).unwrap());
    }

    #[test]
    fn test_double_set_is_corruption() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);

        fs.set_git_bm(3).unwrap();
        assert!(matches!(
            fs.set_git_bm(3),
            Err(SffsError::Corrupted(_))
        ));
        // clear stays unconditional
        fs.clear_git_bm(3).unwrap();
        fs.clear_git_bm(3).unwrap();
    }

    #[test]
    fn test_out_of_range_bit() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);
        let past_end = fs.sb.s_inodes_count;
        assert!(matches!(
            fs.set_git_bm(past_end),
            Err(SffsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_group_word_tracks_bits() {
        let (_dir, mut fs) = fresh_fs(52428800, 4096);

        assert_eq!(fs.read_group_word(1).unwrap(), 0);
        // bits 64 and 66 live in group 1
        fs.set_data_bm(64).unwrap();
        fs.set_data_bm(66).unwrap();
        assert_eq!(fs.read_group_word(1).unwrap(), 0b101);
        assert_eq!(fs.read_group_word(0).unwrap(), 0);
    }
}
