use crate::error::{SffsError, SffsResult};
use crate::fs::{SFFS_IFCHR, SFFS_IFDIR, SFFS_IFIFO, SFFS_IFMT, SFFS_IFREG};

/// File types a mode may carry. Creation requires exactly one bit set in the
/// IFMT nibble, which limits the accepted kinds to these four.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    Fifo,
    CharDevice,
    Directory,
    RegularFile,
}

impl FileKind {
    pub fn from_mode(mode: u16) -> SffsResult<FileKind> {
        match mode & SFFS_IFMT {
            SFFS_IFIFO => Ok(FileKind::Fifo),
            SFFS_IFCHR => Ok(FileKind::CharDevice),
            SFFS_IFDIR => Ok(FileKind::Directory),
            SFFS_IFREG => Ok(FileKind::RegularFile),
            _ => Err(SffsError::InvalidArgument(
                "mode must carry exactly one file-type bit",
            )),
        }
    }

    pub fn is_dir(mode: u16) -> bool {
        mode & SFFS_IFMT == SFFS_IFDIR
    }

    pub fn is_reg(mode: u16) -> bool {
        mode & SFFS_IFMT == SFFS_IFREG
    }
}

impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Fifo => fuser::FileType::NamedPipe,
            FileKind::CharDevice => fuser::FileType::CharDevice,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::RegularFile => fuser::FileType::RegularFile,
        }
    }
}

/// Directory-record type nibble back to a [fuser::FileType]; unknown nibbles
/// are treated as regular files.
pub fn direntry_file_type(nibble: u16) -> fuser::FileType {
    match FileKind::from_mode(nibble << 12) {
        Ok(kind) => kind.into(),
        Err(_) => fuser::FileType::RegularFile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bit_types_are_accepted() {
        assert_eq!(
            FileKind::from_mode(SFFS_IFDIR | 0o755).unwrap(),
            FileKind::Directory
        );
        assert_eq!(
            FileKind::from_mode(SFFS_IFREG | 0o644).unwrap(),
            FileKind::RegularFile
        );
        assert_eq!(FileKind::from_mode(SFFS_IFIFO).unwrap(), FileKind::Fifo);
        assert_eq!(
            FileKind::from_mode(SFFS_IFCHR).unwrap(),
            FileKind::CharDevice
        );
    }

    #[test]
    fn test_combined_type_bits_are_rejected() {
        assert!(FileKind::from_mode(SFFS_IFDIR | SFFS_IFREG).is_err());
        assert!(FileKind::from_mode(SFFS_IFDIR | SFFS_IFCHR).is_err());
        assert!(FileKind::from_mode(0o644).is_err());
    }
}
