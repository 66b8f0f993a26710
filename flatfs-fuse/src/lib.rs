//! Mounts a flatfs image through FUSE.

mod errno;
mod filesystem;
mod inodes;

use std::path::PathBuf;

use flatfs::{Flatfs, FsError, ImageFile};
use fuser::MountOption;
use log::info;
use thiserror::Error;

pub use crate::errno::errno;
pub use crate::filesystem::{file_attr, FlatfsFuse};

#[derive(Error, Debug)]
pub enum MountError {
    #[error("cannot open image {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image is not usable: {0}")]
    Image(#[from] FsError),
    #[error("fuse session failed: {0}")]
    Session(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct MountConfig {
    pub image: PathBuf,
    pub mountpoint: PathBuf,
    /// Let users other than the mounting one access the filesystem.
    pub allow_other: bool,
    /// Unmount when the process exits.
    pub auto_unmount: bool,
}

impl MountConfig {
    fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName("flatfs".to_string()),
            MountOption::RW,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

/// Opens the image, formatting it if it is blank, and serves it at the mount
/// point until the filesystem is unmounted.
pub fn mount(config: &MountConfig) -> Result<(), MountError> {
    let dev = ImageFile::open(&config.image).map_err(|source| MountError::Open {
        path: config.image.clone(),
        source,
    })?;
    let fs = Flatfs::mount(dev)?;
    info!(
        "mounting {} at {}",
        config.image.display(),
        config.mountpoint.display()
    );
    fuser::mount2(FlatfsFuse::new(fs), &config.mountpoint, &config.options())?;
    Ok(())
}
