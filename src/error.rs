use core::fmt;

/// Coarse classification of a [`FatError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad argument or wrong handle state. Nothing was read or written.
    Validation,
    NotFound,
    AlreadyExists,
    /// Directory or volume has no room left.
    NoSpace,
    /// The block device reported a failure.
    Io,
    /// On-disk structures are inconsistent.
    Corruption,
}

#[derive(Debug)]
pub enum FatError<E> {
    Device(E),

    NoFatPartition,
    InvalidBootSector,
    UnsupportedBlockSize(u16),
    UnsupportedBlocksPerCluster(u8),
    InvalidGeometry,

    InvalidName,
    InvalidFlags,
    InvalidTimestamp,
    InvalidSize,
    NotOpen,
    AlreadyOpen,
    HandleFailed,
    NotADirectory,
    IsADirectory,
    NotAFile,
    AccessDenied,
    ReadOnly,
    IsRoot,
    SeekOutOfRange,
    Misaligned,
    FileTooLarge,
    DirectoryNotEmpty,

    NotFound,
    AlreadyExists,

    DirectoryFull,
    NoFreeCluster,

    BadCluster(u32),
    ChainTooShort,
    ClusterChainTooLong,
    NotContiguous,
}

impl<E> FatError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(_) => ErrorKind::Io,
            Self::NoFatPartition | Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyExists => ErrorKind::AlreadyExists,
            Self::DirectoryFull | Self::NoFreeCluster => ErrorKind::NoSpace,
            Self::InvalidBootSector
            | Self::UnsupportedBlockSize(_)
            | Self::UnsupportedBlocksPerCluster(_)
            | Self::BadCluster(_)
            | Self::ChainTooShort
            | Self::ClusterChainTooLong => ErrorKind::Corruption,
            Self::InvalidGeometry
            | Self::InvalidName
            | Self::InvalidFlags
            | Self::InvalidTimestamp
            | Self::InvalidSize
            | Self::NotOpen
            | Self::AlreadyOpen
            | Self::HandleFailed
            | Self::NotADirectory
            | Self::IsADirectory
            | Self::NotAFile
            | Self::AccessDenied
            | Self::ReadOnly
            | Self::IsRoot
            | Self::SeekOutOfRange
            | Self::Misaligned
            | Self::FileTooLarge
            | Self::DirectoryNotEmpty
            | Self::NotContiguous => ErrorKind::Validation,
        }
    }

    /// Errors after which the shared cache and the handle cursor can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::Corruption)
    }
}

impl<E: fmt::Debug> fmt::Display for FatError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(err) => write!(f, "block device error: {err:?}"),
            Self::NoFatPartition => f.write_str("no FAT volume found"),
            Self::InvalidBootSector => f.write_str("invalid boot sector"),
            Self::UnsupportedBlockSize(size) => write!(f, "unsupported sector size {size}"),
            Self::UnsupportedBlocksPerCluster(n) => {
                write!(f, "unsupported sectors per cluster {n}")
            }
            Self::InvalidGeometry => f.write_str("volume geometry does not fit the FAT type"),
            Self::InvalidName => f.write_str("invalid 8.3 name"),
            Self::InvalidFlags => f.write_str("invalid open flag combination"),
            Self::InvalidTimestamp => f.write_str("timestamp out of range"),
            Self::InvalidSize => f.write_str("invalid size"),
            Self::NotOpen => f.write_str("handle is not open"),
            Self::AlreadyOpen => f.write_str("handle is already open"),
            Self::HandleFailed => f.write_str("handle failed earlier and must be closed"),
            Self::NotADirectory => f.write_str("not a directory"),
            Self::IsADirectory => f.write_str("is a directory"),
            Self::NotAFile => f.write_str("entry is neither a file nor a directory"),
            Self::AccessDenied => f.write_str("handle lacks the required access mode"),
            Self::ReadOnly => f.write_str("entry is read-only"),
            Self::IsRoot => f.write_str("operation not allowed on the root directory"),
            Self::SeekOutOfRange => f.write_str("seek position beyond end of file"),
            Self::Misaligned => f.write_str("directory position not on an entry boundary"),
            Self::FileTooLarge => f.write_str("file would exceed 4 GiB"),
            Self::DirectoryNotEmpty => f.write_str("directory not empty"),
            Self::NotFound => f.write_str("not found"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::DirectoryFull => f.write_str("directory full"),
            Self::NoFreeCluster => f.write_str("no free cluster run"),
            Self::BadCluster(cluster) => write!(f, "bad cluster {cluster:#x}"),
            Self::ChainTooShort => f.write_str("cluster chain ends before file size"),
            Self::ClusterChainTooLong => f.write_str("cluster chain does not terminate"),
            Self::NotContiguous => f.write_str("file is not contiguous"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for FatError<E> {}
