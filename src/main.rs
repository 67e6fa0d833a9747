use std::str::FromStr;

use anyhow::anyhow;
use byte_unit::Byte;
use clap::Parser;

use sffs::cli_interface::SffsCli;

/// A CLI interface to either create an sffs image or register it to `FUSE`
/// and mount it. The latter blocks until the file system is unmounted.
fn main() -> anyhow::Result<()> {
    let args = SffsCli::parse();
    match args {
        SffsCli::Mkfs(args) => {
            env_logger::builder().format_timestamp_nanos().init();
            let fs_size = Byte::from_str(&args.fs_size)
                .map_err(|e| anyhow!("cannot parse --fs-size: {e}"))?
                .get_bytes() as u64;
            sffs::mkfs::mkfs(&args.fs_image, fs_size, args.block_size, args.inode_ratio)?;
        }
        SffsCli::Mount(args) => {
            let mut builder = env_logger::builder();
            builder.format_timestamp_nanos();
            if let Some(log_file) = &args.log_file {
                builder.target(env_logger::Target::Pipe(Box::new(std::fs::File::create(
                    log_file,
                )?)));
            }
            builder.init();
            sffs::mount::mount(&args.fs_image, &args.mount_point)?;
        }
    }
    Ok(())
}
