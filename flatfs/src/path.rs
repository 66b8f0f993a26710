use std::fmt;
use std::str::FromStr;

use crate::dir::{DirectoryBlock, FileRecord};
use crate::error::FsError;
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{MAX_EXTENSION, MAX_FILENAME};
use crate::root::RootBlock;

/// A parsed path. The hierarchy is two levels deep: directories live in the
/// root, files live in directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsPath {
    Root,
    Directory(String),
    File {
        directory: String,
        name: String,
        extension: String,
    },
}

impl FsPath {
    pub fn is_file(&self) -> bool {
        matches!(self, FsPath::File { .. })
    }
}

impl FromStr for FsPath {
    type Err = FsError;

    /// Accepts `/`, `/dir` and `/dir/name.ext`, with one optional trailing slash.
    /// The file component splits at its first dot; without one the extension is
    /// empty.
    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| FsError::InvalidPath(format!("{} is not absolute", path)))?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(FsPath::Root);
        }

        let components: Vec<&str> = rest.split('/').collect();
        if components.len() > 2 {
            return Err(FsError::InvalidPath(format!(
                "{} is nested deeper than one directory",
                path
            )));
        }
        if components.iter().any(|c| c.is_empty()) {
            return Err(FsError::InvalidPath(format!("{} has an empty component", path)));
        }

        let directory = components[0];
        if directory.len() > MAX_FILENAME {
            return Err(FsError::NameTooLong);
        }
        let file = match components.get(1) {
            None => return Ok(FsPath::Directory(directory.to_string())),
            Some(file) => *file,
        };

        let (name, extension) = file.split_once('.').unwrap_or((file, ""));
        if name.is_empty() {
            return Err(FsError::InvalidPath(format!("{} has an empty file name", path)));
        }
        if name.len() > MAX_FILENAME || extension.len() > MAX_EXTENSION {
            return Err(FsError::NameTooLong);
        }
        Ok(FsPath::File {
            directory: directory.to_string(),
            name: name.to_string(),
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsPath::Root => write!(f, "/"),
            FsPath::Directory(name) => write!(f, "/{}", name),
            FsPath::File {
                directory,
                name,
                extension,
            } if extension.is_empty() => write!(f, "/{}/{}", directory, name),
            FsPath::File {
                directory,
                name,
                extension,
            } => write!(f, "/{}/{}.{}", directory, name, extension),
        }
    }
}

/// What a path points at on the image.
pub(crate) enum Resolved {
    Root(RootBlock),
    Directory {
        start_block: BlockNumber,
        table: DirectoryBlock,
    },
    File {
        dir_block: BlockNumber,
        table: DirectoryBlock,
        record: FileRecord,
    },
}

/// Walks the root table and, for file paths, the directory table. The root
/// block is always read; `/` needs no further lookup.
pub(crate) fn resolve<T: BlockStorage>(dev: &mut T, path: &FsPath) -> Result<Resolved, FsError> {
    let root = RootBlock::load(dev)?;
    match path {
        FsPath::Root => Ok(Resolved::Root(root)),
        FsPath::Directory(name) => {
            let start_block = root.lookup(name)?;
            let table = DirectoryBlock::load(dev, start_block)?;
            Ok(Resolved::Directory { start_block, table })
        }
        FsPath::File {
            directory,
            name,
            extension,
        } => {
            let dir_block = root.lookup(directory)?;
            let table = DirectoryBlock::load(dev, dir_block)?;
            let record = table.lookup(name, extension)?;
            Ok(Resolved::File {
                dir_block,
                table,
                record,
            })
        }
    }
}
