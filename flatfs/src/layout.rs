//! Geometry of a flatfs image.
//!
//! ```text
//! ===========================================================================
//! | Root (0) | directory, index and data blocks ... | Bitmap (last 3 blocks) |
//! ===========================================================================
//! ```
//!
//! Every record is packed and little-endian so that a structure always sits at
//! an exact, seekable byte offset inside its block.

use crate::error::FsError;
use crate::io::BlockNumber;
use zerocopy::byteorder::{LittleEndian, I32, I64, U64};

pub(crate) type LeI32 = I32<LittleEndian>;
pub(crate) type LeI64 = I64<LittleEndian>;
pub(crate) type LeU64 = U64<LittleEndian>;

pub const BLOCK_SIZE: usize = 512;

/// 8.3 names: up to 8 characters of name and 3 of extension.
pub const MAX_FILENAME: usize = 8;
pub const MAX_EXTENSION: usize = 3;

/// On-disk name fields carry one extra byte for the NUL terminator.
pub(crate) const NAME_FIELD: usize = MAX_FILENAME + 1;
pub(crate) const EXTENSION_FIELD: usize = MAX_EXTENSION + 1;

/// Width of the leading entry count of the root and directory blocks.
pub(crate) const COUNT_FIELD: usize = 4;
/// Width of an on-disk block pointer.
pub(crate) const POINTER_FIELD: usize = 8;
/// Width of an on-disk file size.
pub(crate) const SIZE_FIELD: usize = 8;

pub const MAX_DIRS_IN_ROOT: usize = (BLOCK_SIZE - COUNT_FIELD) / (NAME_FIELD + POINTER_FIELD);
pub const MAX_FILES_IN_DIR: usize =
    (BLOCK_SIZE - COUNT_FIELD) / (NAME_FIELD + EXTENSION_FIELD + SIZE_FIELD + POINTER_FIELD);
pub const MAX_ENTRIES_IN_INDEX_BLOCK: usize = BLOCK_SIZE / POINTER_FIELD;

/// A file can never grow past what one index block can point at.
pub const MAX_FILE_SIZE: u64 = (MAX_ENTRIES_IN_INDEX_BLOCK * BLOCK_SIZE) as u64;

pub const ROOT_BLOCK: BlockNumber = 0;

/// The bitmap lives in the last `BITMAP_BLOCKS` blocks of the image, but only the
/// first `BITMAP_BYTES` of that region are meaningful.
pub const BITMAP_BLOCKS: usize = 3;
pub const BITMAP_BYTES: usize = 1280;

/// Number of blocks the bitmap can track. Also the size of a standard image.
pub const MAX_BLOCKS: usize = BITMAP_BYTES * 8;

/// Root block, at least one directory block, and the bitmap region.
pub const MIN_BLOCKS: usize = 2 + BITMAP_BLOCKS;

/// First block of the bitmap region for an image of `block_count` blocks.
pub fn bitmap_start(block_count: usize) -> BlockNumber {
    block_count - BITMAP_BLOCKS
}

/// Blocks the allocator may hand out for an image of `block_count` blocks.
pub fn addressable_blocks(block_count: usize) -> usize {
    block_count.min(MAX_BLOCKS)
}

/// Converts an on-disk block pointer, rejecting values no allocator could have
/// produced.
pub(crate) fn decode_pointer(raw: LeI64) -> Result<BlockNumber, FsError> {
    let value = raw.get();
    if value < 0 || value as u64 >= MAX_BLOCKS as u64 {
        return Err(FsError::InvalidImage(format!("block pointer {} out of range", value)));
    }
    Ok(value as BlockNumber)
}

pub(crate) fn encode_pointer(blocknr: BlockNumber) -> LeI64 {
    LeI64::new(blocknr as i64)
}

/// Writes `name` into a NUL padded fixed-width field. Callers validate the length
/// first; anything that would not leave room for the terminator is cut short.
pub(crate) fn encode_name<const N: usize>(name: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let len = name.len().min(N - 1);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// Reads a NUL padded field back into a string.
pub(crate) fn decode_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
