use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use flatfs::layout::BLOCK_SIZE;
use flatfs::{Attributes, BlockStorage, EntryKind, Flatfs, FsError};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use log::{debug, info, warn};

use crate::errno::errno;
use crate::inodes::{ino_of, join, InodeTable, ROOT_INO};

const TTL: Duration = Duration::from_secs(1);

/// Serves a mounted image to the kernel. The kernel addresses entries by inode;
/// the engine by path, so every callback first turns its inode into a path.
pub struct FlatfsFuse<T: BlockStorage> {
    fs: Flatfs<T>,
    inodes: InodeTable,
}

/// Kernel-facing attributes for an engine entry.
pub fn file_attr(attrs: &Attributes, uid: u32, gid: u32) -> FileAttr {
    let now = SystemTime::now();
    let (kind, perm) = match attrs.kind {
        EntryKind::Directory => (FileType::Directory, 0o755),
        EntryKind::File => (FileType::RegularFile, 0o666),
    };
    FileAttr {
        ino: ino_of(attrs.block),
        size: attrs.size,
        blocks: attrs.size.div_ceil(BLOCK_SIZE as u64),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind,
        perm,
        nlink: attrs.link_count,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

fn name_str(name: &OsStr) -> Result<&str, c_int> {
    name.to_str().ok_or(libc::EINVAL)
}

impl<T: BlockStorage> FlatfsFuse<T> {
    pub fn new(fs: Flatfs<T>) -> Self {
        FlatfsFuse {
            fs,
            inodes: InodeTable::new(),
        }
    }

    fn path(&self, ino: u64) -> Result<String, c_int> {
        self.inodes.path(ino).map(str::to_string).ok_or(libc::ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        self.inodes
            .child_path(parent, name_str(name)?)
            .ok_or(libc::ENOENT)
    }

    fn fail(&self, op: &str, path: &str, err: FsError) -> c_int {
        debug!("{} {}: {}", op, path, err);
        errno(&err)
    }

    /// Stats `path` and remembers its inode.
    fn stat(&mut self, req: &Request<'_>, path: String) -> Result<FileAttr, c_int> {
        let attrs = self
            .fs
            .getattr(&path)
            .map_err(|err| self.fail("getattr", &path, err))?;
        let attr = file_attr(&attrs, req.uid(), req.gid());
        self.inodes.insert(attr.ino, path);
        Ok(attr)
    }

    fn do_lookup(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
    ) -> Result<FileAttr, c_int> {
        let path = self.child(parent, name)?;
        self.stat(req, path)
    }

    fn do_mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
    ) -> Result<FileAttr, c_int> {
        let path = self.child(parent, name)?;
        self.fs
            .mkdir(&path)
            .map_err(|err| self.fail("mkdir", &path, err))?;
        self.stat(req, path)
    }

    fn do_create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
    ) -> Result<FileAttr, c_int> {
        let path = self.child(parent, name)?;
        self.fs
            .create(&path)
            .map_err(|err| self.fail("create", &path, err))?;
        self.stat(req, path)
    }

    fn do_readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        offset: i64,
        reply: &mut ReplyDirectory,
    ) -> Result<(), c_int> {
        let dir = self.path(ino)?;
        let names = self
            .fs
            .readdir(&dir)
            .map_err(|err| self.fail("readdir", &dir, err))?;

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        for name in names {
            let attr = self.stat(req, join(&dir, &name))?;
            entries.push((attr.ino, attr.kind, name));
        }

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            // The offset passed back in is that of the next entry.
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        Ok(())
    }

    fn do_read(&mut self, ino: u64, offset: i64, size: u32) -> Result<Vec<u8>, c_int> {
        let path = self.path(ino)?;
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let mut buf = vec![0; size as usize];
        let n = self
            .fs
            .read(&path, &mut buf, offset)
            .map_err(|err| self.fail("read", &path, err))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn do_write(&mut self, ino: u64, offset: i64, data: &[u8]) -> Result<u32, c_int> {
        let path = self.path(ino)?;
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let n = self
            .fs
            .write(&path, data, offset)
            .map_err(|err| self.fail("write", &path, err))?;
        Ok(n as u32)
    }

    fn do_setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        size: Option<u64>,
    ) -> Result<FileAttr, c_int> {
        let path = self.path(ino)?;
        if let Some(size) = size {
            self.fs
                .truncate(&path, size)
                .map_err(|err| self.fail("truncate", &path, err))?;
        }
        self.stat(req, path)
    }

    fn do_remove(&mut self, parent: u64, name: &OsStr, dir: bool) -> Result<(), c_int> {
        let path = self.child(parent, name)?;
        let result = if dir {
            self.fs.rmdir(&path)
        } else {
            self.fs.unlink(&path)
        };
        result.map_err(|err| self.fail("remove", &path, err))
    }
}

impl<T: BlockStorage> Filesystem for FlatfsFuse<T> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("flatfs serving requests");
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(err) = self.fs.sync() {
            warn!("final sync failed: {}", err);
        }
        info!("flatfs unmounted after tracking {} inodes", self.inodes.len());
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.do_lookup(req, parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.path(ino).and_then(|path| self.stat(req, path)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.do_setattr(req, ino, size) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        if mode & libc::S_IFMT as u32 != libc::S_IFREG as u32 {
            reply.error(libc::EPERM);
            return;
        }
        match self.do_create(req, parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        match self.do_mkdir(req, parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.do_remove(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.do_remove(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.do_read(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.do_write(ino, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e),
        }
    }

    /// Writes are never buffered, so there is nothing to flush.
    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.do_readdir(req, ino, offset, &mut reply) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        match self.do_create(req, parent, name) {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(e) => reply.error(e),
        }
    }
}
