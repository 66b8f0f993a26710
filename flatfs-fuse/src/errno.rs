use flatfs::FsError;
use libc::c_int;

/// The errno reported to the kernel for an engine error.
pub fn errno(err: &FsError) -> c_int {
    match err {
        FsError::NotFound => libc::ENOENT,
        FsError::AlreadyExists => libc::EEXIST,
        FsError::NameTooLong => libc::ENAMETOOLONG,
        FsError::NoSpace | FsError::OutOfSpace => libc::ENOSPC,
        FsError::OffsetTooLarge { .. } | FsError::FileTooLarge(_) => libc::EFBIG,
        FsError::InvalidPath(_) | FsError::PermissionDenied => libc::EPERM,
        FsError::IsADirectory => libc::EISDIR,
        FsError::InvalidImage(_) | FsError::Io(_) => libc::EIO,
    }
}
