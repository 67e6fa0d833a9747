use std::path::PathBuf;

use clap::Parser;

use crate::fs::SFFS_INODE_RATIO;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum SffsCli {
    /// create a new file system image
    Mkfs(MkfsArgs),
    /// register the file system to `FUSE` and mount it
    Mount(MountArgs),
}

/// make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system image")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(long)]
    pub fs_image: PathBuf,
    /// the size of the file system, with an optional K, M or G suffix
    #[clap(long)]
    pub fs_size: String,
    /// the block size of the file system; probed from the host when omitted
    #[clap(long)]
    pub block_size: Option<u32>,
    /// bytes of file data one inode accounts for
    #[clap(long, default_value_t = SFFS_INODE_RATIO)]
    pub inode_ratio: u32,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a file system image")]
pub struct MountArgs {
    /// the path of the file system image file
    #[clap(long)]
    pub fs_image: PathBuf,
    /// redirect log output into a file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
    /// the mount point of the file system
    pub mount_point: PathBuf,
}

/// test the `SffsCli` struct
/// test `mkfs` subcommand
#[cfg(test)]
mod mkfs_parse_args_tests {
    use super::*;

    #[test]
    fn test_all_options() {
        let args = SffsCli::parse_from([
            "sffs",
            "mkfs",
            "--fs-image",
            "test.img",
            "--fs-size",
            "50M",
            "--block-size",
            "4096",
            "--inode-ratio",
            "65536",
        ]);
        assert_eq!(
            args,
            SffsCli::Mkfs(MkfsArgs {
                fs_image: PathBuf::from("test.img"),
                fs_size: "50M".to_string(),
                block_size: Some(4096),
                inode_ratio: 65536,
            })
        );
    }

    #[test]
    fn test_defaults() {
        let args =
            SffsCli::parse_from(["sffs", "mkfs", "--fs-image", "test.img", "--fs-size", "50M"]);
        assert_eq!(
            args,
            SffsCli::Mkfs(MkfsArgs {
                fs_image: PathBuf::from("test.img"),
                fs_size: "50M".to_string(),
                block_size: None,
                inode_ratio: SFFS_INODE_RATIO,
            })
        );
    }

    #[test]
    fn test_missing_size_is_rejected() {
        assert!(SffsCli::try_parse_from(["sffs", "mkfs", "--fs-image", "test.img"]).is_err());
    }
}

/// test the `SffsCli` struct
/// test `mount` subcommand
#[cfg(test)]
mod mount_parse_args_tests {
    use super::*;

    #[test]
    fn test_mount_point_and_image() {
        let args = SffsCli::parse_from(["sffs", "mount", "--fs-image", "test.img", "/mnt/sffs"]);
        assert_eq!(
            args,
            SffsCli::Mount(MountArgs {
                fs_image: PathBuf::from("test.img"),
                log_file: None,
                mount_point: PathBuf::from("/mnt/sffs"),
            })
        );
    }

    #[test]
    fn test_log_file_option() {
        let args = SffsCli::parse_from([
            "sffs",
            "mount",
            "--fs-image",
            "test.img",
            "--log-file",
            "fslog",
            "/mnt/sffs",
        ]);
        assert_eq!(
            args,
            SffsCli::Mount(MountArgs {
                fs_image: PathBuf::from("test.img"),
                log_file: Some(PathBuf::from("fslog")),
                mount_point: PathBuf::from("/mnt/sffs"),
            })
        );
    }
}
