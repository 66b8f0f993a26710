use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("an entry with that name already exists")]
    AlreadyExists,
    #[error("name does not fit the 8.3 budget")]
    NameTooLong,
    #[error("table has no free entries")]
    NoSpace,
    #[error("no free blocks left on the image")]
    OutOfSpace,
    #[error("offset {offset} is past the end of the file ({size} bytes)")]
    OffsetTooLarge { offset: u64, size: u64 },
    #[error("file would grow past the {0} byte limit of one index block")]
    FileTooLarge(u64),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("is a directory")]
    IsADirectory,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("image I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
