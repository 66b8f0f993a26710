use std::mem::size_of;

use crate::dir::DirectoryBlock;
use crate::error::FsError;
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{
    decode_name, decode_pointer, encode_name, encode_pointer, LeI32, LeI64, BLOCK_SIZE,
    COUNT_FIELD, MAX_DIRS_IN_ROOT, MAX_FILENAME, NAME_FIELD, ROOT_BLOCK,
};
use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
struct DirectoryEntry {
    name: [u8; NAME_FIELD],
    /// Block holding this directory's file table.
    start_block: LeI64,
}

impl DirectoryEntry {
    const EMPTY: Self = Self {
        name: [0; NAME_FIELD],
        start_block: LeI64::new(0),
    };
}

const ROOT_PADDING: usize =
    BLOCK_SIZE - COUNT_FIELD - MAX_DIRS_IN_ROOT * size_of::<DirectoryEntry>();

/// Block 0 of the image: the table of every subdirectory and the block that
/// holds its file table, in creation order.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct RootBlock {
    count: LeI32,
    directories: [DirectoryEntry; MAX_DIRS_IN_ROOT],
    padding: [u8; ROOT_PADDING],
}

const _: () = assert!(size_of::<RootBlock>() == BLOCK_SIZE);

impl RootBlock {
    pub fn new() -> Self {
        Self {
            count: LeI32::new(0),
            directories: [DirectoryEntry::EMPTY; MAX_DIRS_IN_ROOT],
            padding: [0; ROOT_PADDING],
        }
    }

    /// Decodes a root block from a buffer of exactly `BLOCK_SIZE` bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        let root = RootBlock::read_from_bytes(buf)
            .map_err(|_| FsError::InvalidImage("root block has the wrong size".to_string()))?;
        let count = root.count.get();
        if count < 0 || count as usize > MAX_DIRS_IN_ROOT {
            return Err(FsError::InvalidImage(format!(
                "root block claims {} directories",
                count
            )));
        }
        for entry in root.entries() {
            decode_pointer(entry.start_block)?;
        }
        Ok(root)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self, FsError> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(ROOT_BLOCK, &mut buf)?;
        RootBlock::parse(&buf)
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T) -> Result<(), FsError> {
        dev.write_block(ROOT_BLOCK, self.serialize())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count.get() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> &[DirectoryEntry] {
        &self.directories[..self.len()]
    }

    /// Start block of the directory called `name`.
    pub fn lookup(&self, name: &str) -> Result<BlockNumber, FsError> {
        self.entries()
            .iter()
            .find(|entry| decode_name(&entry.name) == name)
            .map(|entry| entry.start_block.get() as BlockNumber)
            .ok_or(FsError::NotFound)
    }

    /// Directory names in storage (creation) order.
    pub fn list(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| decode_name(&entry.name))
            .collect()
    }

    /// Creates an empty directory: reserves one block, writes an empty file table
    /// there, appends the entry and rewrites the root block.
    pub fn create_directory<T: BlockStorage>(
        &mut self,
        dev: &mut T,
        name: &str,
    ) -> Result<BlockNumber, FsError> {
        if name.len() > MAX_FILENAME {
            return Err(FsError::NameTooLong);
        }
        if name.is_empty() {
            return Err(FsError::InvalidPath("empty directory name".to_string()));
        }
        if self.lookup(name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        if self.len() >= MAX_DIRS_IN_ROOT {
            return Err(FsError::NoSpace);
        }

        let start_block = crate::alloc::find_and_reserve_block(dev)?;
        DirectoryBlock::new().store(dev, start_block)?;

        let slot = self.len();
        self.directories[slot] = DirectoryEntry {
            name: encode_name(name),
            start_block: encode_pointer(start_block),
        };
        self.count = LeI32::new(slot as i32 + 1);
        self.store(dev)?;
        debug!("directory {} created at block {}", name, start_block);
        Ok(start_block)
    }
}

impl Default for RootBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Bitmap, State};
    use crate::io::{ImageFile, ImageFileBuilder};

    /// A 64 block image with the root and bitmap blocks already reserved.
    fn formatted_device() -> ImageFile {
        let mut dev = ImageFileBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(64)
            .build()
            .unwrap();
        let mut bitmap = Bitmap::new();
        for blocknr in [0, 61, 62, 63] {
            bitmap.set_reserved(blocknr);
        }
        bitmap.store(&mut dev).unwrap();
        RootBlock::new().store(&mut dev).unwrap();
        dev
    }

    #[test]
    fn encoding_is_bit_exact() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();
        root.create_directory(&mut dev, "DOCS").unwrap();

        let mut raw = [0u8; BLOCK_SIZE];
        dev.read_block(ROOT_BLOCK, &mut raw).unwrap();
        // count
        assert_eq!(&raw[0..4], &[1, 0, 0, 0]);
        // name[9]
        assert_eq!(&raw[4..13], b"DOCS\0\0\0\0\0");
        // start_block, the first free block after the root
        assert_eq!(&raw[13..21], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert!(raw[21..].iter().all(|&b| b == 0));
    }

    #[test]
    fn create_reserves_block_and_initializes_directory() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();

        let start = root.create_directory(&mut dev, "a").unwrap();

        assert_eq!(Bitmap::load(&mut dev).unwrap().get(start), State::Used);
        assert!(DirectoryBlock::load(&mut dev, start).unwrap().is_empty());
        assert_eq!(RootBlock::load(&mut dev).unwrap().lookup("a").unwrap(), start);
    }

    #[test]
    fn list_keeps_creation_order() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            root.create_directory(&mut dev, name).unwrap();
        }

        assert_eq!(
            RootBlock::load(&mut dev).unwrap().list(),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn duplicate_name_leaves_root_unchanged() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();
        root.create_directory(&mut dev, "DOCS").unwrap();
        let before = RootBlock::load(&mut dev).unwrap().serialize().to_vec();

        let err = root.create_directory(&mut dev, "DOCS").unwrap_err();

        assert!(matches!(err, FsError::AlreadyExists));
        assert_eq!(RootBlock::load(&mut dev).unwrap().serialize(), &before[..]);
    }

    #[test]
    fn long_names_are_rejected() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();

        let err = root.create_directory(&mut dev, "ninechars").unwrap_err();

        assert!(matches!(err, FsError::NameTooLong));
        assert!(RootBlock::load(&mut dev).unwrap().is_empty());
    }

    #[test]
    fn full_root_reports_no_space() {
        let mut dev = formatted_device();
        let mut root = RootBlock::load(&mut dev).unwrap();
        for i in 0..MAX_DIRS_IN_ROOT {
            root.create_directory(&mut dev, &format!("d{}", i)).unwrap();
        }

        let err = root.create_directory(&mut dev, "extra").unwrap_err();

        assert!(matches!(err, FsError::NoSpace));
        assert_eq!(RootBlock::load(&mut dev).unwrap().len(), MAX_DIRS_IN_ROOT);
    }

    #[test]
    fn lookup_missing_directory() {
        let root = RootBlock::new();
        assert!(matches!(root.lookup("nope"), Err(FsError::NotFound)));
    }

    #[test]
    fn parsing_rejects_impossible_counts() {
        let mut raw = [0u8; BLOCK_SIZE];
        raw[0] = 30;
        assert!(matches!(
            RootBlock::parse(&raw),
            Err(FsError::InvalidImage(_))
        ));
    }

    #[test]
    fn parsing_rejects_wrong_size() {
        assert!(RootBlock::parse(&[0u8; 100]).is_err());
    }
}
