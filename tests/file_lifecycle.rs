mod common;

use common::{all_types, open_root, pattern, BLOCK_SIZE};
use sdfat::{ErrorKind, FatError, File, OpenFlags};

const CREATE_NEW: OpenFlags = OpenFlags::CREAT
    .union(OpenFlags::EXCL)
    .union(OpenFlags::RDWR);

#[test]
fn hello_file_round_trip() {
    for mut vol in all_types() {
        let mut root = open_root(&mut vol);
        let mut file = File::new();
        file.open(&mut vol, &mut root, "A.TXT", CREATE_NEW).unwrap();
        assert_eq!(file.write(&mut vol, b"hello").unwrap(), 5);
        file.close(&mut vol).unwrap();

        file.open(&mut vol, &mut root, "A.TXT", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(file.read(&mut vol, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(file.read(&mut vol, &mut buf).unwrap(), 0);
        file.close(&mut vol).unwrap();

        file.open(&mut vol, &mut root, "a.txt", OpenFlags::RDWR).unwrap();
        file.remove(&mut vol).unwrap();
        assert!(!file.is_open());

        file.open(&mut vol, &mut root, "A.TXT", CREATE_NEW).unwrap();
        assert_eq!(file.file_size(), 0);
        file.close(&mut vol).unwrap();
    }
}

#[test]
fn empty_file_reads_nothing_and_truncates_trivially() {
    for mut vol in all_types() {
        let mut root = open_root(&mut vol);
        let mut file = File::new();
        file.open(&mut vol, &mut root, "EMPTY", CREATE_NEW).unwrap();
        file.close(&mut vol).unwrap();

        file.open(&mut vol, &mut root, "EMPTY", OpenFlags::RDWR).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut vol, &mut buf).unwrap(), 0);
        file.truncate(&mut vol, 0).unwrap();
        assert_eq!(file.first_cluster(), 0);
        assert_eq!(file.file_size(), 0);
    }
}

#[test]
fn chunking_does_not_change_contents() {
    let data = pattern(5 * BLOCK_SIZE + 123, 7);
    for mut vol in all_types() {
        let mut root = open_root(&mut vol);
        for (name, chunk) in [("C1", 1usize), ("C7", 7), ("C512", 512), ("C700", 700), ("ALL", data.len())] {
            let mut file = File::new();
            file.open(&mut vol, &mut root, name, CREATE_NEW).unwrap();
            for piece in data.chunks(chunk) {
                assert_eq!(file.write(&mut vol, piece).unwrap(), piece.len());
            }
            file.close(&mut vol).unwrap();

            file.open(&mut vol, &mut root, name, OpenFlags::READ).unwrap();
            assert_eq!(file.file_size() as usize, data.len());
            let mut back = vec![0u8; data.len() + 10];
            assert_eq!(file.read(&mut vol, &mut back).unwrap(), data.len());
            assert_eq!(&back[..data.len()], &data[..], "{name}");
            file.close(&mut vol).unwrap();
        }
    }
}

#[test]
fn reads_in_odd_pieces_match_one_big_read() {
    let data = pattern(3 * BLOCK_SIZE + 17, 3);
    let mut vol = common::fat16();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut root, "R.BIN", CREATE_NEW).unwrap();
    file.write(&mut vol, &data).unwrap();
    file.rewind();

    let mut back = Vec::new();
    let mut piece = [0u8; 77];
    loop {
        let n = file.read(&mut vol, &mut piece).unwrap();
        if n == 0 {
            break;
        }
        back.extend_from_slice(&piece[..n]);
    }
    assert_eq!(back, data);
    assert_eq!(file.available(), 0);
}

#[test]
fn removed_file_frees_clusters_and_slot() {
    for mut vol in all_types() {
        let free_before = vol.free_cluster_count().unwrap();
        let mut root = open_root(&mut vol);
        let mut file = File::new();
        file.open(&mut vol, &mut root, "BIG.DAT", CREATE_NEW).unwrap();
        file.write(&mut vol, &pattern(10_000, 1)).unwrap();
        let first = file.first_cluster();
        let (dir_block, dir_index) = file.dir_location();
        file.close(&mut vol).unwrap();
        assert!(vol.free_cluster_count().unwrap() < free_before);

        File::remove_in(&mut vol, &mut root, "BIG.DAT").unwrap();
        assert_eq!(vol.free_cluster_count().unwrap(), free_before);
        assert_eq!(vol.fat_get(first).unwrap(), 0);

        file.open(&mut vol, &mut root, "BIG.DAT", CREATE_NEW).unwrap();
        assert_eq!(file.dir_location(), (dir_block, dir_index));
        file.close(&mut vol).unwrap();
    }
}

#[test]
fn exclusive_create_rejects_existing_name() {
    let mut vol = common::fat12();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut root, "X.TXT", CREATE_NEW).unwrap();
    file.close(&mut vol).unwrap();

    let err = file.open(&mut vol, &mut root, "x.txt", CREATE_NEW).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(!file.is_open());

    file.open(&mut vol, &mut root, "X.TXT", OpenFlags::CREAT | OpenFlags::RDWR)
        .unwrap();
    file.close(&mut vol).unwrap();

    let err = file.open(&mut vol, &mut root, "NOPE", OpenFlags::READ).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn bad_names_fail_validation() {
    let mut vol = common::fat12();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    for name in ["", "TOOLONGNAME", "A.B.C", "BAD*", "A.LONG"] {
        let err = file.open(&mut vol, &mut root, name, CREATE_NEW).unwrap_err();
        assert!(matches!(err, FatError::InvalidName), "{name:?}");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn scan_continues_past_deleted_slot_to_existing_name() {
    let mut vol = common::fat16();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    for name in ["FIRST", "SECOND", "TARGET"] {
        file.open(&mut vol, &mut root, name, CREATE_NEW).unwrap();
        file.write(&mut vol, name.as_bytes()).unwrap();
        file.close(&mut vol).unwrap();
    }
    File::remove_in(&mut vol, &mut root, "FIRST").unwrap();

    file.open(&mut vol, &mut root, "TARGET", OpenFlags::CREAT | OpenFlags::RDWR)
        .unwrap();
    assert_eq!(file.file_size(), 6);
    assert_eq!(file.dir_location().1, 2);
    file.close(&mut vol).unwrap();

    let mut names = Vec::new();
    root.rewind();
    while let Some(entry) = root.read_dir(&mut vol).unwrap() {
        names.push(entry.name.to_display().to_string());
    }
    assert_eq!(names, ["SECOND", "TARGET"]);
}

#[test]
fn append_and_truncate_track_size() {
    for mut vol in all_types() {
        let mut root = open_root(&mut vol);
        let mut file = File::new();
        file.open(
            &mut vol,
            &mut root,
            "LOG.TXT",
            OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::APPEND,
        )
        .unwrap();
        file.write(&mut vol, &pattern(3000, 9)).unwrap();
        file.rewind();
        file.write(&mut vol, b"tail").unwrap();
        assert_eq!(file.file_size(), 3004);
        assert_eq!(file.cur_position(), 3004);

        file.seek_set(&mut vol, 100).unwrap();
        file.truncate(&mut vol, 700).unwrap();
        assert_eq!(file.file_size(), 700);
        assert_eq!(file.cur_position(), 100);
        file.close(&mut vol).unwrap();

        file.open(&mut vol, &mut root, "LOG.TXT", OpenFlags::RDWR).unwrap();
        assert_eq!(file.file_size(), 700);
        let mut back = vec![0u8; 1000];
        assert_eq!(file.read(&mut vol, &mut back).unwrap(), 700);
        assert_eq!(&back[..700], &pattern(3000, 9)[..700]);
        assert!(matches!(file.truncate(&mut vol, 701), Err(FatError::InvalidSize)));
        file.close(&mut vol).unwrap();

        file.open(
            &mut vol,
            &mut root,
            "LOG.TXT",
            OpenFlags::RDWR | OpenFlags::TRUNC,
        )
        .unwrap();
        assert_eq!(file.file_size(), 0);
        assert_eq!(file.first_cluster(), 0);
        file.close(&mut vol).unwrap();
    }
}

#[test]
fn sync_flag_commits_size_on_every_write() {
    let mut vol = common::fat32();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut root, "S.TXT", CREATE_NEW | OpenFlags::SYNC)
        .unwrap();
    file.write(&mut vol, b"12345").unwrap();
    assert_eq!(file.dir_entry(&mut vol).unwrap().file_size, 5);

    // a second handle sees the committed size without a close
    let mut reader = File::new();
    reader.open(&mut vol, &mut root, "S.TXT", OpenFlags::READ).unwrap();
    assert_eq!(reader.file_size(), 5);
}

#[test]
fn overwrite_in_middle_keeps_surrounding_bytes() {
    let mut vol = common::fat12();
    let mut root = open_root(&mut vol);
    let mut file = File::new();
    file.open(&mut vol, &mut root, "MID", CREATE_NEW).unwrap();
    let mut expected = pattern(2000, 5);
    file.write(&mut vol, &expected).unwrap();
    file.seek_set(&mut vol, 500).unwrap();
    file.write(&mut vol, &[0xAA; 30]).unwrap();
    expected[500..530].fill(0xAA);
    assert_eq!(file.file_size(), 2000);

    file.rewind();
    let mut back = vec![0u8; 2000];
    file.read(&mut vol, &mut back).unwrap();
    assert_eq!(back, expected);
}
