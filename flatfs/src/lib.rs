//! A two level filesystem stored on a flat image of 512 byte blocks.
//!
//! The root block lists directories, each directory block lists 8.3 named
//! files, and each file owns one index block pointing at its data blocks.
//! Free space is tracked by a bitmap kept in the last three blocks of the
//! image.

mod alloc;
mod dir;
mod error;
mod fs;
mod index;
pub mod io;
pub mod layout;
mod path;
mod root;

pub use crate::alloc::find_and_reserve_block;
pub use crate::error::FsError;
pub use crate::fs::{Attributes, EntryKind, Flatfs};
pub use crate::io::{BlockNumber, BlockStorage, ImageFile, ImageFileBuilder};
pub use crate::path::FsPath;
