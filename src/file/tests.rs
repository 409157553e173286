use super::*;
use crate::block::Block;
use crate::config::BLOCK_SIZE;
use crate::format::{format, FormatOptions};
use crate::time::{NoClock, Timestamp};
use crate::volume::FatType;

struct MemDisk {
    blocks: Vec<Block>,
    fail_writes: bool,
}

impl MemDisk {
    fn new(blocks: u32) -> Self {
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; blocks as usize],
            fail_writes: false,
        }
    }
}

impl BlockDevice for MemDisk {
    type Error = &'static str;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), Self::Error> {
        let src = self.blocks.get(block as usize).ok_or("out of range")?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err("write failed");
        }
        let dst = self.blocks.get_mut(block as usize).ok_or("out of range")?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}

fn floppy() -> Volume<MemDisk> {
    let mut disk = MemDisk::new(2880);
    format(&mut disk, &FormatOptions::new(FatType::Fat12, 2880, 1)).unwrap();
    Volume::mount(disk, NoClock).unwrap()
}

fn root(vol: &mut Volume<MemDisk>) -> File {
    let mut root = File::new();
    root.open_root(vol).unwrap();
    root
}

#[test]
fn open_flags_are_validated_before_any_io() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    for flags in [
        OpenFlags::empty(),
        OpenFlags::CREAT,
        OpenFlags::READ | OpenFlags::CREAT,
        OpenFlags::READ | OpenFlags::TRUNC,
        OpenFlags::READ | OpenFlags::APPEND,
        OpenFlags::RDWR | OpenFlags::EXCL,
    ] {
        let err = file.open(&mut vol, &mut dir, "A.TXT", flags).unwrap_err();
        assert!(matches!(err, FatError::InvalidFlags), "{flags:?}");
    }
    assert!(!file.is_open());
}

#[test]
fn handle_keeps_only_mode_flags() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    file.open(
        &mut vol,
        &mut dir,
        "A.TXT",
        OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::SYNC,
    )
    .unwrap();
    assert_eq!(file.flags(), OpenFlags::RDWR | OpenFlags::SYNC);
    assert!(matches!(
        file.open(&mut vol, &mut dir, "B.TXT", OpenFlags::READ),
        Err(FatError::AlreadyOpen)
    ));
}

#[test]
fn fixed_root_reports_its_slot_capacity() {
    let mut vol = floppy();
    let dir = root(&mut vol);
    assert_eq!(dir.kind(), FileKind::Root16);
    assert_eq!(dir.file_size(), 224 * 32);
    assert_eq!(dir.first_cluster(), 0);
    assert!(dir.is_root() && dir.is_dir() && !dir.is_subdir());
}

#[test]
fn seek_walks_chain_from_nearest_known_cluster() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    file.open(
        &mut vol,
        &mut dir,
        "DATA.BIN",
        OpenFlags::RDWR | OpenFlags::CREAT,
    )
    .unwrap();
    let payload: Vec<u8> = (0..4 * BLOCK_SIZE).map(|i| (i / BLOCK_SIZE) as u8).collect();
    file.write(&mut vol, &payload).unwrap();
    let first = file.first_cluster();
    assert_eq!(file.cur_position(), 2048);
    assert_eq!(file.cur_cluster(), first + 3);

    file.seek_set(&mut vol, 512).unwrap();
    assert_eq!(file.cur_cluster(), first);
    file.seek_set(&mut vol, 513).unwrap();
    assert_eq!(file.cur_cluster(), first + 1);
    file.seek_cur(&mut vol, 1024).unwrap();
    assert_eq!(file.cur_cluster(), first + 3);
    file.seek_end(&mut vol, -2048).unwrap();
    assert_eq!(file.cur_position(), 0);
    assert_eq!(file.cur_cluster(), 0);
    assert!(matches!(
        file.seek_set(&mut vol, 2049),
        Err(FatError::SeekOutOfRange)
    ));
    assert_eq!(file.cur_position(), 0);

    file.seek_set(&mut vol, 1536).unwrap();
    let mut byte = [0u8; 1];
    assert_eq!(file.read(&mut vol, &mut byte).unwrap(), 1);
    assert_eq!(byte[0], 3);
}

#[test]
fn write_only_and_read_only_handles_reject_the_other_direction() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut dir, "W.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(
        file.read(&mut vol, &mut buf),
        Err(FatError::AccessDenied)
    ));
    file.write(&mut vol, b"abcd").unwrap();
    file.close(&mut vol).unwrap();

    file.open(&mut vol, &mut dir, "W.TXT", OpenFlags::READ).unwrap();
    assert!(matches!(file.write(&mut vol, b"x"), Err(FatError::AccessDenied)));
    assert!(matches!(file.truncate(&mut vol, 0), Err(FatError::AccessDenied)));
    assert_eq!(file.state(), HandleState::Open);
}

#[test]
fn device_failure_poisons_the_handle_until_close() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut dir, "F.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .unwrap();
    file.write(&mut vol, &[7u8; 100]).unwrap();

    vol.cache.flush().unwrap();
    let mut disk = vol.into_device().unwrap();
    disk.fail_writes = true;
    let mut vol = Volume::mount(disk, NoClock).unwrap();

    let err = file.write(&mut vol, &[1u8; BLOCK_SIZE]).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    assert_eq!(file.state(), HandleState::Failed);
    assert!(matches!(file.seek_set(&mut vol, 0), Err(FatError::HandleFailed)));
    assert!(matches!(file.sync(&mut vol), Err(FatError::HandleFailed)));
    file.close(&mut vol).unwrap();
    assert_eq!(file.state(), HandleState::Closed);
    assert!(matches!(file.close(&mut vol), Err(FatError::NotOpen)));
}

#[test]
fn clock_stamps_new_entries_and_writes() {
    let mut disk = MemDisk::new(2880);
    format(&mut disk, &FormatOptions::new(FatType::Fat12, 2880, 1)).unwrap();
    let created = Timestamp {
        date: crate::time::pack_date(2021, 6, 5),
        time: crate::time::pack_time(12, 30, 10),
    };
    let mut vol = Volume::mount(disk, move || created).unwrap();
    let mut dir = File::new();
    dir.open_root(&mut vol).unwrap();
    let mut file = File::new();
    file.open(&mut vol, &mut dir, "T.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .unwrap();
    let entry = file.dir_entry(&mut vol).unwrap();
    assert_eq!(entry.creation, created);
    assert_eq!(entry.last_write, created);
    assert_eq!(entry.last_access_date, created.date);

    file.write(&mut vol, b"x").unwrap();
    assert!(file.dir_dirty);
}

#[test]
fn default_stamp_without_clock_and_no_dirty_on_overwrite() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut dir, "D.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .unwrap();
    file.write(&mut vol, b"abc").unwrap();
    file.sync(&mut vol).unwrap();
    file.rewind();
    file.write(&mut vol, b"xy").unwrap();
    assert!(!file.dir_dirty);
    assert_eq!(file.dir_entry(&mut vol).unwrap().creation, Timestamp::DEFAULT);
}

#[test]
fn directory_handles_refuse_file_operations() {
    let mut vol = floppy();
    let mut dir = root(&mut vol);
    let mut sub = File::new();
    sub.make_dir(&mut vol, &mut dir, "SUB").unwrap();
    assert!(sub.is_subdir());
    assert_eq!(sub.flags(), OpenFlags::READ);
    assert!(matches!(sub.write(&mut vol, b"x"), Err(FatError::IsADirectory)));
    assert!(matches!(sub.truncate(&mut vol, 0), Err(FatError::IsADirectory)));
    sub.close(&mut vol).unwrap();

    let mut again = File::new();
    assert!(matches!(
        again.open(&mut vol, &mut dir, "SUB", OpenFlags::RDWR),
        Err(FatError::IsADirectory)
    ));
    assert!(matches!(dir.rm_dir(&mut vol), Err(FatError::IsRoot)));
    let mut file = File::new();
    file.open(&mut vol, &mut dir, "F", OpenFlags::RDWR | OpenFlags::CREAT)
        .unwrap();
    let mut inner = File::new();
    assert!(matches!(
        inner.open(&mut vol, &mut file, "X", OpenFlags::READ),
        Err(FatError::NotADirectory)
    ));
}
