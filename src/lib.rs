#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod cache;
pub mod config;
pub mod dirent;
pub mod error;
pub mod file;
pub mod format;
pub mod name;
pub mod time;
pub mod volume;

pub use block::{Block, BlockDevice, StorageBlockDevice, StorageBlockError};
pub use dirent::{Attributes, DirEntry};
pub use error::{ErrorKind, FatError};
pub use file::{File, FileKind, HandleState, OpenFlags, StampFields};
pub use format::{format, FormatOptions};
pub use name::ShortName;
pub use time::{DateTime, NoClock, TimeSource, Timestamp};
pub use volume::{FatType, Geometry, RootDir, Volume};
