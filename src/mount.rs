//! Register the file system with `FUSE` and mount it.
//!
//! Blocks until the file system is unmounted. The kernel serializes calls
//! into the context, which the single-threaded core relies on.

use std::path::Path;

use fuser::MountOption;

use crate::fs::Sffs;

pub fn mount<P, Q>(image_path: P, mountpoint: Q) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let fs = Sffs::mount(image_path)?;

    let options = vec![
        MountOption::FSName("sffs".to_string()),
        MountOption::DefaultPermissions,
    ];
    Ok(fuser::mount2(fs, mountpoint, &options)?)
}
