use super::block::{BlockNumber, BlockStorage};
use crate::layout::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// A disk image stored in a regular file, addressed in `BLOCK_SIZE` units.
pub struct ImageFile {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl ImageFile {
    /// Opens an existing image for reading and writing. The block count is the file
    /// length rounded down to whole blocks.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        let block_count = (fd.metadata()?.len() / BLOCK_SIZE as u64) as usize;
        Ok(ImageFile { fd, block_count })
    }

    /// Creates (or replaces) the image at `path` as `blocks` zeroed blocks.
    pub fn create<P: AsRef<Path>>(path: P, blocks: usize) -> std::io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        ImageFileBuilder::from(fd).with_block_count(blocks).build()
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber, len: usize) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("block {} out of range (image has {})", blocknr, self.block_count),
            ));
        }
        if len != BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer must be exactly one block long",
            ));
        }
        Ok(())
    }
}

impl BlockStorage for ImageFile {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        // A file shorter than the addressed offset surfaces as UnexpectedEof.
        self.fd.read_exact(buf)
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct ImageFileBuilder {
    fd: File,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for ImageFileBuilder {
    fn from(fd: File) -> Self {
        ImageFileBuilder {
            fd,
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl ImageFileBuilder {
    /// Sets the number of desired blocks in the image.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether `build` zeroes the image. Turn this off to reuse an image that
    /// already holds a filesystem.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless
    /// `clear_medium(false)` was requested, does destructive things to prepare the
    /// file for use.
    pub fn build(mut self) -> std::io::Result<ImageFile> {
        if self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "an image needs at least one block",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(ImageFile {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.set_len(0)?;
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive writes.
        let zeroes = [0x00; BLOCK_SIZE];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(blocks: usize) -> ImageFile {
        let image = tempfile::tempfile().unwrap();
        ImageFileBuilder::from(image)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate image")
    }

    #[test]
    fn builder_allocates_correct_num_bytes() {
        let mut disk = device(4);
        disk.sync_disk().unwrap();
        assert_eq!(disk.block_count(), 4);
        assert_eq!(disk.into_file().metadata().unwrap().len(), 4 * 512);
    }

    #[test]
    fn can_read_and_write_blocks() {
        let mut disk = device(4);

        // Fill a block with a non-zero character.
        let block = vec![0x55; 512];
        disk.write_block(2, &block).unwrap();

        let mut read_block = vec![0x00; 512];
        // Read a different block.
        disk.read_block(3, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x00; 512]);

        disk.read_block(2, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x55; 512]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let mut disk = device(2);

        disk.write_block(0, &[0x11; 512]).unwrap();
        disk.write_block(1, &[0x22; 512]).unwrap();

        let mut read_block = [0x00; 512];
        disk.read_block(0, &mut read_block).unwrap();
        assert_eq!(read_block, [0x11; 512]);
        disk.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, [0x22; 512]);
    }

    #[test]
    fn access_beyond_range_is_an_error() {
        let mut disk = device(1);

        let err = disk.write_block(1, &[0x55; 512]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut buf = [0; 512];
        let err = disk.read_block(7, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn partial_block_buffers_are_rejected() {
        let mut disk = device(1);
        assert!(disk.write_block(0, &[0x55; 256]).is_err());
    }

    #[test]
    fn short_backing_file_fails_reads() {
        let image = tempfile::tempfile().unwrap();
        // Claim two blocks over an empty file.
        let mut disk = ImageFileBuilder::from(image)
            .with_block_count(2)
            .clear_medium(false)
            .build()
            .unwrap();

        let mut buf = [0; 512];
        let err = disk.read_block(1, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn open_derives_block_count_from_length() {
        let image = tempfile::NamedTempFile::new().unwrap();
        ImageFile::create(image.path(), 6).unwrap();

        let disk = ImageFile::open(image.path()).unwrap();
        assert_eq!(disk.block_count(), 6);
    }

    #[test]
    fn rebuilding_without_clearing_keeps_contents() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let mut disk = ImageFileBuilder::from(image.reopen().unwrap())
            .with_block_count(3)
            .build()
            .unwrap();
        disk.write_block(1, &[0x7f; 512]).unwrap();

        let mut disk = ImageFileBuilder::from(image.reopen().unwrap())
            .with_block_count(3)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = [0; 512];
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [0x7f; 512]);
    }
}
