use std::mem::size_of;

use crate::error::FsError;
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{
    decode_pointer, encode_pointer, LeI64, BLOCK_SIZE, MAX_ENTRIES_IN_INDEX_BLOCK, MAX_FILE_SIZE,
};
use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The data blocks of one file, in file order: `entries[i]` holds bytes
/// `[i * BLOCK_SIZE, (i + 1) * BLOCK_SIZE)`.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct IndexBlock {
    entries: [LeI64; MAX_ENTRIES_IN_INDEX_BLOCK],
}

const _: () = assert!(size_of::<IndexBlock>() == BLOCK_SIZE);

/// Data blocks a file of `size` bytes occupies. A new file owns its first data
/// block before anything is written, so this is never below one.
pub fn blocks_in_use(size: u64) -> usize {
    (size.div_ceil(BLOCK_SIZE as u64) as usize).max(1)
}

impl IndexBlock {
    pub fn new() -> Self {
        Self {
            entries: [LeI64::new(0); MAX_ENTRIES_IN_INDEX_BLOCK],
        }
    }

    /// Entries are checked lazily by `get`, since slots past the end of the file
    /// are never initialized.
    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        IndexBlock::read_from_bytes(buf)
            .map_err(|_| FsError::InvalidImage("index block has the wrong size".to_string()))
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn load<T: BlockStorage>(dev: &mut T, blocknr: BlockNumber) -> Result<Self, FsError> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(blocknr, &mut buf)?;
        IndexBlock::parse(&buf)
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T, blocknr: BlockNumber) -> Result<(), FsError> {
        dev.write_block(blocknr, self.serialize())?;
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Result<BlockNumber, FsError> {
        let raw = self.entries.get(slot).ok_or_else(|| {
            FsError::InvalidImage(format!("index slot {} out of range", slot))
        })?;
        decode_pointer(*raw)
    }

    pub fn set(&mut self, slot: usize, blocknr: BlockNumber) {
        self.entries[slot] = encode_pointer(blocknr);
    }

    /// Extends the chain from `in_use` to `required` data blocks, reserving one
    /// block at a time, then rewrites the index block at `at`.
    ///
    /// If the allocator runs dry part way, the blocks reserved so far stay marked
    /// used and the index block on disk is left as it was.
    pub fn grow<T: BlockStorage>(
        &mut self,
        dev: &mut T,
        at: BlockNumber,
        in_use: usize,
        required: usize,
    ) -> Result<(), FsError> {
        if required <= in_use {
            return Ok(());
        }
        if required > MAX_ENTRIES_IN_INDEX_BLOCK {
            return Err(FsError::FileTooLarge(MAX_FILE_SIZE));
        }
        for slot in in_use..required {
            let blocknr = crate::alloc::find_and_reserve_block(dev)?;
            self.set(slot, blocknr);
        }
        self.store(dev, at)?;
        debug!(
            "index block {} grown from {} to {} data blocks",
            at, in_use, required
        );
        Ok(())
    }
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self::new()
    }
}
