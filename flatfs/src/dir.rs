use std::mem::size_of;

use crate::error::FsError;
use crate::index::IndexBlock;
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{
    decode_name, decode_pointer, encode_name, encode_pointer, LeI32, LeI64, LeU64, BLOCK_SIZE,
    COUNT_FIELD, EXTENSION_FIELD, MAX_EXTENSION, MAX_FILENAME, MAX_FILES_IN_DIR, MAX_FILE_SIZE,
    NAME_FIELD,
};
use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
struct FileEntry {
    name: [u8; NAME_FIELD],
    extension: [u8; EXTENSION_FIELD],
    /// Bytes written to the file so far.
    size: LeU64,
    index_block: LeI64,
}

impl FileEntry {
    const EMPTY: Self = Self {
        name: [0; NAME_FIELD],
        extension: [0; EXTENSION_FIELD],
        size: LeU64::new(0),
        index_block: LeI64::new(0),
    };
}

const DIRECTORY_PADDING: usize =
    BLOCK_SIZE - COUNT_FIELD - MAX_FILES_IN_DIR * size_of::<FileEntry>();

/// The file table of one directory, stored at the directory's start block.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct DirectoryBlock {
    count: LeI32,
    files: [FileEntry; MAX_FILES_IN_DIR],
    padding: [u8; DIRECTORY_PADDING],
}

const _: () = assert!(size_of::<DirectoryBlock>() == BLOCK_SIZE);

/// A decoded file entry together with the slot it occupies in its directory block.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub slot: usize,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub index_block: BlockNumber,
}

impl DirectoryBlock {
    pub fn new() -> Self {
        Self {
            count: LeI32::new(0),
            files: [FileEntry::EMPTY; MAX_FILES_IN_DIR],
            padding: [0; DIRECTORY_PADDING],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FsError> {
        let dir = DirectoryBlock::read_from_bytes(buf).map_err(|_| {
            FsError::InvalidImage("directory block has the wrong size".to_string())
        })?;
        let count = dir.count.get();
        if count < 0 || count as usize > MAX_FILES_IN_DIR {
            return Err(FsError::InvalidImage(format!(
                "directory block claims {} files",
                count
            )));
        }
        for entry in dir.entries() {
            decode_pointer(entry.index_block)?;
            if entry.size.get() > MAX_FILE_SIZE {
                return Err(FsError::InvalidImage(format!(
                    "file {} claims {} bytes",
                    decode_name(&entry.name),
                    entry.size.get()
                )));
            }
        }
        Ok(dir)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn load<T: BlockStorage>(dev: &mut T, blocknr: BlockNumber) -> Result<Self, FsError> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(blocknr, &mut buf)?;
        DirectoryBlock::parse(&buf)
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T, blocknr: BlockNumber) -> Result<(), FsError> {
        dev.write_block(blocknr, self.serialize())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count.get() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> &[FileEntry] {
        &self.files[..self.len()]
    }

    fn record(slot: usize, entry: &FileEntry) -> FileRecord {
        FileRecord {
            slot,
            name: decode_name(&entry.name),
            extension: decode_name(&entry.extension),
            size: entry.size.get(),
            index_block: entry.index_block.get() as BlockNumber,
        }
    }

    pub fn lookup(&self, name: &str, extension: &str) -> Result<FileRecord, FsError> {
        self.entries()
            .iter()
            .enumerate()
            .find(|(_, entry)| {
                decode_name(&entry.name) == name && decode_name(&entry.extension) == extension
            })
            .map(|(slot, entry)| DirectoryBlock::record(slot, entry))
            .ok_or(FsError::NotFound)
    }

    /// `(name, extension)` pairs in storage order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.entries()
            .iter()
            .map(|entry| (decode_name(&entry.name), decode_name(&entry.extension)))
            .collect()
    }

    /// Creates an empty file. The index block is reserved first and the file's
    /// first data block right after it, so a new file always owns two blocks.
    /// The directory block is rewritten to `dir_block` on success.
    pub fn create_file<T: BlockStorage>(
        &mut self,
        dev: &mut T,
        dir_block: BlockNumber,
        name: &str,
        extension: &str,
    ) -> Result<FileRecord, FsError> {
        if name.len() > MAX_FILENAME || extension.len() > MAX_EXTENSION {
            return Err(FsError::NameTooLong);
        }
        if name.is_empty() {
            return Err(FsError::InvalidPath("empty file name".to_string()));
        }
        if self.lookup(name, extension).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        if self.len() >= MAX_FILES_IN_DIR {
            return Err(FsError::NoSpace);
        }

        let index_block = crate::alloc::find_and_reserve_block(dev)?;
        let first_data = crate::alloc::find_and_reserve_block(dev)?;
        let mut index = IndexBlock::new();
        index.set(0, first_data);
        index.store(dev, index_block)?;

        let slot = self.len();
        self.files[slot] = FileEntry {
            name: encode_name(name),
            extension: encode_name(extension),
            size: LeU64::new(0),
            index_block: encode_pointer(index_block),
        };
        self.count = LeI32::new(slot as i32 + 1);
        self.store(dev, dir_block)?;
        debug!(
            "file {}.{} created: index block {}, first data block {}",
            name, extension, index_block, first_data
        );
        Ok(DirectoryBlock::record(slot, &self.files[slot]))
    }

    /// Updates the size of the file in `slot`. Only the in-memory copy changes;
    /// the caller stores the block.
    pub fn set_size(&mut self, slot: usize, size: u64) {
        self.files[slot].size = LeU64::new(size);
    }
}

impl Default for DirectoryBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Bitmap, State};
    use crate::io::{ImageFile, ImageFileBuilder};

    const DIR: BlockNumber = 1;

    /// A 64 block image with the root, one directory block and the bitmap reserved.
    fn device_with_directory() -> ImageFile {
        let mut dev = ImageFileBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(64)
            .build()
            .unwrap();
        let mut bitmap = Bitmap::new();
        for blocknr in [0, DIR, 61, 62, 63] {
            bitmap.set_reserved(blocknr);
        }
        bitmap.store(&mut dev).unwrap();
        DirectoryBlock::new().store(&mut dev, DIR).unwrap();
        dev
    }

    #[test]
    fn entry_layout_is_packed() {
        assert_eq!(size_of::<FileEntry>(), 29);
        assert_eq!(DIRECTORY_PADDING, 15);
    }

    #[test]
    fn create_reserves_index_then_data_block() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();

        let file = dir.create_file(&mut dev, DIR, "readme", "txt").unwrap();

        assert_eq!(file.index_block, 2);
        assert_eq!(file.size, 0);
        let index = IndexBlock::load(&mut dev, file.index_block).unwrap();
        assert_eq!(index.get(0).unwrap(), 3);
        let bitmap = Bitmap::load(&mut dev).unwrap();
        assert_eq!(bitmap.get(2), State::Used);
        assert_eq!(bitmap.get(3), State::Used);
    }

    #[test]
    fn encoding_is_bit_exact() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();
        dir.create_file(&mut dev, DIR, "readme", "txt").unwrap();
        dir.set_size(0, 600);
        dir.store(&mut dev, DIR).unwrap();

        let mut raw = [0u8; BLOCK_SIZE];
        dev.read_block(DIR, &mut raw).unwrap();
        assert_eq!(&raw[0..4], &[1, 0, 0, 0]);
        assert_eq!(&raw[4..13], b"readme\0\0\0");
        assert_eq!(&raw[13..17], b"txt\0");
        assert_eq!(&raw[17..25], &600u64.to_le_bytes());
        assert_eq!(&raw[25..33], &2i64.to_le_bytes());
    }

    #[test]
    fn lookup_matches_name_and_extension() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();
        dir.create_file(&mut dev, DIR, "a", "txt").unwrap();
        dir.create_file(&mut dev, DIR, "a", "md").unwrap();

        let dir = DirectoryBlock::load(&mut dev, DIR).unwrap();
        assert_eq!(dir.lookup("a", "md").unwrap().slot, 1);
        assert!(matches!(dir.lookup("a", ""), Err(FsError::NotFound)));
        assert_eq!(
            dir.list(),
            vec![
                ("a".to_string(), "txt".to_string()),
                ("a".to_string(), "md".to_string())
            ]
        );
    }

    #[test]
    fn duplicate_file_is_rejected() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();
        dir.create_file(&mut dev, DIR, "a", "txt").unwrap();

        let err = dir.create_file(&mut dev, DIR, "a", "txt").unwrap_err();

        assert!(matches!(err, FsError::AlreadyExists));
        assert_eq!(DirectoryBlock::load(&mut dev, DIR).unwrap().len(), 1);
    }

    #[test]
    fn long_names_do_not_reserve_blocks() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();

        assert!(matches!(
            dir.create_file(&mut dev, DIR, "ninechars", "txt"),
            Err(FsError::NameTooLong)
        ));
        assert!(matches!(
            dir.create_file(&mut dev, DIR, "ok", "long"),
            Err(FsError::NameTooLong)
        ));
        assert_eq!(Bitmap::load(&mut dev).unwrap().get(2), State::Free);
    }

    #[test]
    fn full_directory_reports_no_space() {
        let mut dev = device_with_directory();
        let mut dir = DirectoryBlock::load(&mut dev, DIR).unwrap();
        for i in 0..MAX_FILES_IN_DIR {
            dir.create_file(&mut dev, DIR, &format!("f{}", i), "").unwrap();
        }

        assert!(matches!(
            dir.create_file(&mut dev, DIR, "extra", ""),
            Err(FsError::NoSpace)
        ));
    }

    #[test]
    fn parsing_rejects_bad_pointers() {
        let mut dir = DirectoryBlock::new();
        dir.count = LeI32::new(1);
        dir.files[0].index_block = LeI64::new(-4);
        assert!(matches!(
            DirectoryBlock::parse(dir.serialize()),
            Err(FsError::InvalidImage(_))
        ));
    }
}
