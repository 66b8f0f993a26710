use std::sync::{Mutex, MutexGuard};

use crate::alloc::{Bitmap, State};
use crate::dir::{DirectoryBlock, FileRecord};
use crate::error::FsError;
use crate::index::{blocks_in_use, IndexBlock};
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{bitmap_start, BLOCK_SIZE, MAX_BLOCKS, MIN_BLOCKS, ROOT_BLOCK};
use crate::path::{resolve, FsPath, Resolved};
use crate::root::RootBlock;

use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// What `getattr` reports for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    /// Bytes written for files, zero for directories.
    pub size: u64,
    pub link_count: u32,
    /// The block that identifies the entry: 0 for `/`, the start block of a
    /// directory, the index block of a file. Never reused, so callers may key
    /// handles on it.
    pub block: BlockNumber,
}

impl Attributes {
    fn directory(block: BlockNumber) -> Self {
        Attributes {
            kind: EntryKind::Directory,
            size: 0,
            link_count: 2,
            block,
        }
    }

    fn file(record: &FileRecord) -> Self {
        Attributes {
            kind: EntryKind::File,
            size: record.size,
            link_count: 1,
            block: record.index_block,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A two level filesystem over a flat block image.
///
/// # Layout
/// ===========================================================================
/// | Root (0) | directory, index and data blocks ... | Bitmap (last 3 blocks) |
/// ===========================================================================
///
/// Nothing is cached between calls: every operation locks the device, reads the
/// records it needs, writes back the ones it changed and releases the lock.
pub struct Flatfs<T: BlockStorage> {
    dev: Mutex<T>,
}

impl<T: BlockStorage> Flatfs<T> {
    /// Takes ownership of `dev`. A device whose bitmap does not mark block 0 as
    /// used has never held a filesystem and is formatted first.
    pub fn mount(mut dev: T) -> Result<Self, FsError> {
        let blocks = dev.block_count();
        if blocks < MIN_BLOCKS {
            return Err(FsError::InvalidImage(format!(
                "{} blocks is too small, need at least {}",
                blocks, MIN_BLOCKS
            )));
        }

        let bitmap = Bitmap::load(&mut dev)?;
        if bitmap.get(ROOT_BLOCK) == State::Free {
            Self::format(&mut dev, bitmap)?;
        } else {
            // Fail the mount rather than the first operation.
            RootBlock::load(&mut dev)?;
        }
        info!("mounted image of {} blocks", blocks);

        Ok(Flatfs {
            dev: Mutex::new(dev),
        })
    }

    fn format(dev: &mut T, mut bitmap: Bitmap) -> Result<(), FsError> {
        let blocks = dev.block_count();
        RootBlock::new().store(dev)?;
        bitmap.set_reserved(ROOT_BLOCK);
        for blocknr in bitmap_start(blocks)..blocks.min(MAX_BLOCKS) {
            bitmap.set_reserved(blocknr);
        }
        bitmap.store(dev)?;
        dev.sync_disk()?;
        info!("formatted empty filesystem on {} blocks", blocks);
        Ok(())
    }

    /// Gives the device back, e.g. to reopen it later.
    pub fn into_inner(self) -> Result<T, FsError> {
        self.dev.into_inner().map_err(|_| poisoned())
    }

    fn device(&self) -> Result<MutexGuard<'_, T>, FsError> {
        self.dev.lock().map_err(|_| poisoned())
    }

    /// Flushes the backing store.
    pub fn sync(&self) -> Result<(), FsError> {
        self.device()?.sync_disk()?;
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> Result<Attributes, FsError> {
        let path: FsPath = path.parse()?;
        let mut dev = self.device()?;
        match resolve(&mut *dev, &path)? {
            Resolved::Root(_) => Ok(Attributes::directory(ROOT_BLOCK)),
            Resolved::Directory { start_block, .. } => Ok(Attributes::directory(start_block)),
            Resolved::File { record, .. } => Ok(Attributes::file(&record)),
        }
    }

    /// Names under `path` in storage order: directory names for `/`, `name.ext`
    /// (or bare `name`) for a directory.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let path: FsPath = path.parse()?;
        if path.is_file() {
            return Err(FsError::NotFound);
        }
        let mut dev = self.device()?;
        match resolve(&mut *dev, &path)? {
            Resolved::Root(root) => Ok(root.list()),
            Resolved::Directory { table, .. } => Ok(table
                .list()
                .into_iter()
                .map(|(name, extension)| {
                    if extension.is_empty() {
                        name
                    } else {
                        format!("{}.{}", name, extension)
                    }
                })
                .collect()),
            Resolved::File { .. } => Err(FsError::NotFound),
        }
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let name = match path.parse::<FsPath>()? {
            FsPath::Directory(name) => name,
            FsPath::Root => return Err(FsError::AlreadyExists),
            FsPath::File { .. } => {
                return Err(FsError::InvalidPath(format!(
                    "{} names a file, not a directory",
                    path
                )))
            }
        };
        let mut dev = self.device()?;
        let mut root = RootBlock::load(&mut *dev)?;
        root.create_directory(&mut *dev, &name)?;
        Ok(())
    }

    /// Creates an empty file. Its index block and first data block are reserved
    /// immediately.
    pub fn create(&self, path: &str) -> Result<(), FsError> {
        let (directory, name, extension) = match path.parse::<FsPath>()? {
            FsPath::File {
                directory,
                name,
                extension,
            } => (directory, name, extension),
            _ => return Err(FsError::PermissionDenied),
        };
        let mut dev = self.device()?;
        let root = RootBlock::load(&mut *dev)?;
        let dir_block = root.lookup(&directory)?;
        let mut table = DirectoryBlock::load(&mut *dev, dir_block)?;
        table.create_file(&mut *dev, dir_block, &name, &extension)?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the number of
    /// bytes copied, which is short when the file ends first.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let path = file_path(path)?;
        if buf.is_empty() {
            return Err(FsError::NotFound);
        }
        let mut dev = self.device()?;
        let (_, _, record) = resolve_file(&mut *dev, &path)?;
        if offset > record.size {
            return Err(FsError::OffsetTooLarge {
                offset,
                size: record.size,
            });
        }

        let len = buf.len().min((record.size - offset) as usize);
        let index = IndexBlock::load(&mut *dev, record.index_block)?;
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let pos = offset as usize + done;
            let start = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - start).min(len - done);
            dev.read_block(index.get(pos / BLOCK_SIZE)?, &mut block)?;
            buf[done..done + n].copy_from_slice(&block[start..start + n]);
            done += n;
        }
        Ok(len)
    }

    /// Writes `data` at `offset`, which may be anywhere up to and including the
    /// current end of the file. Missing data blocks are reserved before any
    /// payload is written; the new size is stored last.
    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let path = file_path(path)?;
        if data.is_empty() {
            return Err(FsError::NotFound);
        }
        let mut dev = self.device()?;
        let (dir_block, mut table, record) = resolve_file(&mut *dev, &path)?;
        if offset > record.size {
            return Err(FsError::OffsetTooLarge {
                offset,
                size: record.size,
            });
        }

        let new_size = record.size.max(offset + data.len() as u64);
        let in_use = blocks_in_use(record.size);
        let required = blocks_in_use(new_size);
        debug!(
            "write {} bytes at {} to {}: size {} -> {}, blocks {} -> {}",
            data.len(),
            offset,
            path,
            record.size,
            new_size,
            in_use,
            required
        );
        let mut index = IndexBlock::load(&mut *dev, record.index_block)?;
        index.grow(&mut *dev, record.index_block, in_use, required)?;

        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < data.len() {
            let pos = offset as usize + done;
            let start = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - start).min(data.len() - done);
            let blocknr = index.get(pos / BLOCK_SIZE)?;
            if n < BLOCK_SIZE {
                dev.read_block(blocknr, &mut block)?;
            }
            block[start..start + n].copy_from_slice(&data[done..done + n]);
            dev.write_block(blocknr, &block)?;
            done += n;
        }

        table.set_size(record.slot, new_size);
        table.store(&mut *dev, dir_block)?;
        Ok(data.len())
    }

    /// Directories are never removed; the call succeeds and changes nothing.
    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        warn!("rmdir {}: removal is not supported, nothing changed", path);
        Ok(())
    }

    /// Files are never removed; the call succeeds and changes nothing.
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        warn!("unlink {}: removal is not supported, nothing changed", path);
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<(), FsError> {
        debug!("truncate {} to {} ignored", path, size);
        Ok(())
    }
}

fn poisoned() -> FsError {
    FsError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "image lock poisoned by a panicked operation",
    ))
}

/// Parses a path that must name a file. Anything else is a directory as far as
/// `read` and `write` are concerned.
fn file_path(path: &str) -> Result<FsPath, FsError> {
    let path: FsPath = path.parse()?;
    if !path.is_file() {
        return Err(FsError::IsADirectory);
    }
    Ok(path)
}

fn resolve_file<T: BlockStorage>(
    dev: &mut T,
    path: &FsPath,
) -> Result<(BlockNumber, DirectoryBlock, FileRecord), FsError> {
    match resolve(dev, path)? {
        Resolved::File {
            dir_block,
            table,
            record,
        } => Ok((dir_block, table, record)),
        _ => Err(FsError::IsADirectory),
    }
}
