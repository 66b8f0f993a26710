/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Fixed-size block access to the backing store of a filesystem image.
///
/// Implementations perform every call immediately against the store; there is no
/// buffering or caching layer between the filesystem and the device, so a read always
/// observes the most recent write to the same block.
pub trait BlockStorage {
    /// Total number of blocks the device exposes.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer. The buffer must be exactly one
    /// block long.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or a block the backing store is too
    /// short to hold, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number. The buffer must be
    /// exactly one block long.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
