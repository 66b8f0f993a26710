use crate::error::FsError;
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{addressable_blocks, bitmap_start, BITMAP_BLOCKS, BITMAP_BYTES, BLOCK_SIZE};
use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Clone, Copy)]
pub struct Bitmap {
    /// One bit per block, least significant bit first: block `n` is bit `n % 8` of
    /// byte `n / 8`. 1280 bytes track 10,240 blocks.
    bits: [u8; BITMAP_BYTES],
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bits: [0; BITMAP_BYTES],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        Bitmap::read_from_bytes(&buf[..BITMAP_BYTES.min(buf.len())])
            .map_err(|_| FsError::InvalidImage("bitmap region is truncated".to_string()))
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    /// Reads the bitmap from the last `BITMAP_BLOCKS` blocks of the device.
    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self, FsError> {
        let start = region_start(dev)?;
        let mut region = [0u8; BITMAP_BLOCKS * BLOCK_SIZE];
        for (i, chunk) in region.chunks_mut(BLOCK_SIZE).enumerate() {
            dev.read_block(start + i, chunk)?;
        }
        Bitmap::parse(&region)
    }

    /// Writes the whole bitmap region back. Bytes past `BITMAP_BYTES` carry no
    /// meaning and are written as zeroes.
    pub fn store<T: BlockStorage>(&self, dev: &mut T) -> Result<(), FsError> {
        let start = region_start(dev)?;
        let mut region = [0u8; BITMAP_BLOCKS * BLOCK_SIZE];
        region[..BITMAP_BYTES].copy_from_slice(self.serialize());
        for (i, chunk) in region.chunks(BLOCK_SIZE).enumerate() {
            dev.write_block(start + i, chunk)?;
        }
        Ok(())
    }

    pub fn get(&self, blocknr: BlockNumber) -> State {
        match self.bits[blocknr / 8] & (1 << (blocknr % 8)) {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, blocknr: BlockNumber) {
        self.bits[blocknr / 8] |= 1 << (blocknr % 8);
    }

    /// Lowest free block below `cap`, if any.
    pub fn first_free(&self, cap: usize) -> Option<BlockNumber> {
        (0..cap.min(BITMAP_BYTES * 8)).find(|&blocknr| self.get(blocknr) == State::Free)
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

fn region_start<T: BlockStorage>(dev: &T) -> Result<BlockNumber, FsError> {
    if dev.block_count() < BITMAP_BLOCKS {
        return Err(FsError::InvalidImage(format!(
            "{} blocks cannot hold the bitmap region",
            dev.block_count()
        )));
    }
    Ok(bitmap_start(dev.block_count()))
}

/// First-fit reservation: scans from block 0 upwards, marks the lowest free block as
/// used and persists the bitmap before returning it. Each call reserves exactly one
/// block.
pub fn find_and_reserve_block<T: BlockStorage>(dev: &mut T) -> Result<BlockNumber, FsError> {
    let mut bitmap = Bitmap::load(dev)?;
    let blocknr = bitmap
        .first_free(addressable_blocks(dev.block_count()))
        .ok_or(FsError::OutOfSpace)?;
    bitmap.set_reserved(blocknr);
    bitmap.store(dev)?;
    debug!("reserved block {}", blocknr);
    Ok(blocknr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ImageFile, ImageFileBuilder};

    fn device(blocks: usize) -> ImageFile {
        ImageFileBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(blocks)
            .build()
            .unwrap()
    }

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0);
        bmp.set_reserved(10239);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(10239), State::Used);
        assert_eq!(bmp.serialize()[0], 0b0000_0001);
        assert_eq!(bmp.serialize()[1279], 0b1000_0000);
    }

    #[test]
    fn bits_are_least_significant_first() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(10237);
        bmp.set_reserved(10238);
        bmp.set_reserved(10239);
        // The three bitmap blocks of a standard image.
        assert_eq!(bmp.serialize()[1279], 224);
    }

    #[test]
    fn first_free_skips_used_blocks_and_respects_cap() {
        let mut bmp = Bitmap::new();
        for blocknr in 0..5 {
            bmp.set_reserved(blocknr);
        }
        bmp.set_reserved(6);

        assert_eq!(bmp.first_free(64), Some(5));
        assert_eq!(bmp.first_free(5), None);
    }

    #[test]
    fn bitmap_lives_in_the_last_three_blocks() {
        let mut dev = device(16);
        let mut bmp = Bitmap::new();
        bmp.set_reserved(9);
        bmp.store(&mut dev).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        dev.read_block(13, &mut block).unwrap();
        assert_eq!(block[1], 0b0000_0010);

        let read_bmp = Bitmap::load(&mut dev).unwrap();
        assert_eq!(read_bmp.serialize(), bmp.serialize());
    }

    #[test]
    fn reservation_is_first_fit_and_persisted() {
        let mut dev = device(16);
        let mut bmp = Bitmap::new();
        bmp.set_reserved(0);
        bmp.set_reserved(2);
        bmp.store(&mut dev).unwrap();

        assert_eq!(find_and_reserve_block(&mut dev).unwrap(), 1);
        assert_eq!(find_and_reserve_block(&mut dev).unwrap(), 3);

        let on_disk = Bitmap::load(&mut dev).unwrap();
        assert_eq!(on_disk.get(1), State::Used);
        assert_eq!(on_disk.get(3), State::Used);
        assert_eq!(on_disk.get(4), State::Free);
    }

    #[test]
    fn never_returns_a_used_block() {
        let mut dev = device(32);
        let mut seen = Vec::new();
        while let Ok(blocknr) = find_and_reserve_block(&mut dev) {
            assert!(!seen.contains(&blocknr));
            seen.push(blocknr);
        }
        // Includes the bitmap blocks themselves since nothing reserved them.
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn exhausted_bitmap_reports_out_of_space() {
        let mut dev = device(4);
        let mut bmp = Bitmap::new();
        for blocknr in 0..4 {
            bmp.set_reserved(blocknr);
        }
        bmp.store(&mut dev).unwrap();

        assert!(matches!(
            find_and_reserve_block(&mut dev),
            Err(FsError::OutOfSpace)
        ));
    }

    #[test]
    fn device_too_small_for_bitmap_is_invalid() {
        let mut dev = device(2);
        assert!(matches!(
            Bitmap::load(&mut dev),
            Err(FsError::InvalidImage(_))
        ));
    }
}
