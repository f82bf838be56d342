use std::collections::BTreeSet;
use std::fs;
use std::io::{IoSlice, IoSliceMut};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use harha_core::{
    Dir, DirDeleteOptions, DirOpenOptions, FileOpenOptions, Kind, Mode, Permissions, SafePath,
    Vfs, VfsError, Whence,
};
use harha_host::PassthroughFs;

fn sp(s: &str) -> SafePath<'_> {
    SafePath::new(s).expect("valid path")
}

fn vfs_over(dir: &TempDir) -> Vfs {
    let backend = PassthroughFs::new(dir.path()).expect("backend");
    Vfs::new(backend, Permissions::all())
}

fn write_file(vfs: &Vfs, path: &str, contents: &[u8]) {
    let file = vfs
        .open_file(
            Dir::ROOT,
            sp(path),
            FileOpenOptions {
                mode: Mode::WriteOnly,
                create: true,
            },
        )
        .expect("create file");
    let written = vfs
        .writev(file, &[IoSlice::new(contents)])
        .expect("write file");
    assert_eq!(written, contents.len());
    vfs.close_file(file);
}

#[test]
fn seek_whence_semantics() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "t.txt", b"0123456789");

    let file = vfs
        .open_file(Dir::ROOT, sp("t.txt"), FileOpenOptions::default())
        .expect("open read-only");

    assert_eq!(vfs.seek(file, 5, Whence::Set).expect("seek"), 5);
    let mut buf = [0u8; 5];
    let n = vfs
        .readv(file, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!((n, &buf[..n]), (5, &b"56789"[..]));

    // Backward subtracts from the current cursor (10 after the read),
    // saturating at zero.
    assert_eq!(vfs.seek(file, 3, Whence::Backward).expect("seek"), 7);
    let mut buf = [0u8; 5];
    let n = vfs
        .readv(file, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!((n, &buf[..n]), (3, &b"789"[..]));

    assert_eq!(vfs.seek(file, 4, Whence::FromEnd).expect("seek"), 6);
    assert_eq!(vfs.seek(file, 100, Whence::Backward).expect("seek"), 0);
    assert_eq!(vfs.seek(file, 2, Whence::Forward).expect("seek"), 2);
    vfs.close_file(file);
}

#[test]
fn scatter_write_then_scatter_read() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);

    let file = vfs
        .open_file(
            Dir::ROOT,
            sp("hello.txt"),
            FileOpenOptions {
                mode: Mode::WriteOnly,
                create: true,
            },
        )
        .expect("create");
    let written = vfs
        .writev(
            file,
            &[
                IoSlice::new(b"Hello"),
                IoSlice::new(b", "),
                IoSlice::new(b"World!"),
            ],
        )
        .expect("writev");
    assert_eq!(written, 13);
    vfs.close_file(file);

    let file = vfs
        .open_file(Dir::ROOT, sp("hello.txt"), FileOpenOptions::default())
        .expect("reopen");
    let mut first = [0u8; 5];
    let mut second = [0u8; 7];
    let n = vfs
        .readv(
            file,
            &mut [IoSliceMut::new(&mut first), IoSliceMut::new(&mut second)],
        )
        .expect("readv");
    assert_eq!(n, 12);
    assert_eq!(&first, b"Hello");
    assert_eq!(&second, b", World");
    vfs.close_file(file);
}

#[test]
fn scatter_roundtrip_via_preadv() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);

    let file = vfs
        .open_file(
            Dir::ROOT,
            sp("parts.bin"),
            FileOpenOptions {
                mode: Mode::ReadWrite,
                create: true,
            },
        )
        .expect("create");
    vfs.writev(
        file,
        &[IoSlice::new(b"abc"), IoSlice::new(b"de"), IoSlice::new(b"fgh")],
    )
    .expect("writev");

    let mut buf = [0u8; 8];
    let n = vfs
        .preadv(file, &mut [IoSliceMut::new(&mut buf)], 0)
        .expect("preadv");
    assert_eq!((n, &buf[..]), (8, &b"abcdefgh"[..]));
    vfs.close_file(file);
}

#[test]
fn cursors_are_per_handle() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "shared.txt", b"abcdef");

    let first = vfs
        .open_file(Dir::ROOT, sp("shared.txt"), FileOpenOptions::default())
        .expect("open");
    let second = vfs
        .open_file(Dir::ROOT, sp("shared.txt"), FileOpenOptions::default())
        .expect("open again");

    vfs.seek(first, 4, Whence::Set).expect("seek");
    let mut buf = [0u8; 2];
    let n = vfs
        .readv(second, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!((n, &buf[..]), (2, &b"ab"[..]));

    let mut buf = [0u8; 2];
    let n = vfs
        .readv(first, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!((n, &buf[..]), (2, &b"ef"[..]));

    vfs.close_file(first);
    vfs.close_file(second);
}

#[test]
fn preadv_leaves_the_cursor_alone() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "p.txt", b"abcdef");

    let file = vfs
        .open_file(Dir::ROOT, sp("p.txt"), FileOpenOptions::default())
        .expect("open");

    let mut buf = [0u8; 3];
    vfs.readv(file, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!(&buf, b"abc");

    let mut buf = [0u8; 6];
    let n = vfs
        .preadv(file, &mut [IoSliceMut::new(&mut buf)], 0)
        .expect("preadv");
    assert_eq!((n, &buf[..]), (6, &b"abcdef"[..]));

    // The cursor is still where readv left it.
    let mut buf = [0u8; 3];
    let n = vfs
        .readv(file, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    assert_eq!((n, &buf[..]), (3, &b"def"[..]));
    vfs.close_file(file);
}

#[test]
fn iteration_lists_exactly_the_entries() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "one.txt", b"1");
    write_file(&vfs, "two.txt", b"22");
    vfs.open_dir(
        Dir::ROOT,
        sp("sub"),
        DirOpenOptions {
            create: true,
            ..Default::default()
        },
    )
    .expect("mkdir");

    let mut iter = vfs.iterate(Dir::ROOT).expect("iterate");
    let mut seen = BTreeSet::new();
    while let Some(entry) = iter.next().expect("next") {
        if entry.basename == "sub" {
            assert_eq!(entry.stat.kind, Kind::Dir);
        } else {
            assert_eq!(entry.stat.kind, Kind::File);
        }
        seen.insert(entry.basename);
    }
    let expected: BTreeSet<String> = ["one.txt", "two.txt", "sub"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(seen, expected);

    iter.reset().expect("reset");
    let mut again = BTreeSet::new();
    while let Some(entry) = iter.next().expect("next") {
        again.insert(entry.basename);
    }
    assert_eq!(again, expected);
    iter.close();
}

#[cfg(unix)]
#[test]
fn iteration_skips_unsafe_basenames() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("bad\\name"), b"x").expect("host write");
    fs::write(dir.path().join("good.txt"), b"y").expect("host write");

    let vfs = vfs_over(&dir);
    let mut iter = vfs.iterate(Dir::ROOT).expect("iterate");
    let mut seen = Vec::new();
    while let Some(entry) = iter.next().expect("next") {
        seen.push(entry.basename);
    }
    assert_eq!(seen, vec!["good.txt"]);
    iter.close();
}

#[test]
fn opening_a_directory_as_a_file_fails() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    vfs.open_dir(
        Dir::ROOT,
        sp("d"),
        DirOpenOptions {
            create: true,
            ..Default::default()
        },
    )
    .expect("mkdir");

    assert_eq!(
        vfs.open_file(Dir::ROOT, sp("d"), FileOpenOptions::default()),
        Err(VfsError::IsDir)
    );
}

#[test]
fn delete_semantics() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "gone.txt", b"x");
    vfs.open_dir(
        Dir::ROOT,
        sp("tree/nested"),
        DirOpenOptions {
            create: true,
            ..Default::default()
        },
    )
    .expect("mkdir -p");
    write_file(&vfs, "tree/nested/f.txt", b"x");

    vfs.delete_file(Dir::ROOT, sp("gone.txt")).expect("delete");
    assert_eq!(
        vfs.stat(Dir::ROOT, sp("gone.txt")),
        Err(VfsError::FileNotFound)
    );

    #[cfg(unix)]
    assert_eq!(
        vfs.delete_dir(Dir::ROOT, sp("tree"), DirDeleteOptions::default()),
        Err(VfsError::DirNotEmpty)
    );
    vfs.delete_dir(
        Dir::ROOT,
        sp("tree"),
        DirDeleteOptions { recursive: true },
    )
    .expect("tree delete");
    assert_eq!(vfs.stat(Dir::ROOT, sp("tree")), Err(VfsError::FileNotFound));
}

#[test]
fn mode_violations_are_reported() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "m.txt", b"abc");

    let read_only = vfs
        .open_file(Dir::ROOT, sp("m.txt"), FileOpenOptions::default())
        .expect("open");
    assert_eq!(
        vfs.writev(read_only, &[IoSlice::new(b"x")]),
        Err(VfsError::NotOpenForWriting)
    );
    vfs.close_file(read_only);

    let write_only = vfs
        .open_file(
            Dir::ROOT,
            sp("m.txt"),
            FileOpenOptions {
                mode: Mode::WriteOnly,
                create: false,
            },
        )
        .expect("open");
    let mut buf = [0u8; 1];
    assert_eq!(
        vfs.readv(write_only, &mut [IoSliceMut::new(&mut buf)]),
        Err(VfsError::NotOpenForReading)
    );
    vfs.close_file(write_only);
}

#[test]
fn stale_handles_and_double_close() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    write_file(&vfs, "s.txt", b"abc");

    let file = vfs
        .open_file(Dir::ROOT, sp("s.txt"), FileOpenOptions::default())
        .expect("open");
    vfs.close_file(file);
    vfs.close_file(file);

    let mut buf = [0u8; 1];
    assert_eq!(
        vfs.readv(file, &mut [IoSliceMut::new(&mut buf)]),
        Err(VfsError::FileNotFound)
    );
    assert_eq!(vfs.seek(file, 0, Whence::Set), Err(VfsError::FileNotFound));

    let sub = vfs
        .open_dir(
            Dir::ROOT,
            sp("sub"),
            DirOpenOptions {
                create: true,
                ..Default::default()
            },
        )
        .expect("mkdir");
    vfs.close_dir(sub);
    vfs.close_dir(sub);
    assert_eq!(vfs.stat(sub, sp("x")), Err(VfsError::FileNotFound));
}

#[test]
fn chroot_confines_root_relative_lookups() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    vfs.open_dir(
        Dir::ROOT,
        sp("jail/inner"),
        DirOpenOptions {
            create: true,
            ..Default::default()
        },
    )
    .expect("mkdir -p");
    write_file(&vfs, "jail/inner/f.txt", b"hi");
    write_file(&vfs, "outside.txt", b"no");

    vfs.chroot(Dir::ROOT, sp("jail")).expect("chroot");
    assert_eq!(
        vfs.stat(Dir::ROOT, sp("/inner/f.txt")).expect("stat").kind,
        Kind::File
    );
    assert_eq!(
        vfs.stat(Dir::ROOT, sp("outside.txt")),
        Err(VfsError::FileNotFound)
    );

    vfs.chroot(Dir::ROOT, SafePath::empty()).expect("revert");
    assert_eq!(
        vfs.stat(Dir::ROOT, sp("outside.txt")).expect("stat").kind,
        Kind::File
    );
}

#[test]
fn walker_covers_the_host_tree() {
    let dir = TempDir::new().expect("tempdir");
    let vfs = vfs_over(&dir);
    vfs.open_dir(
        Dir::ROOT,
        sp("a/b"),
        DirOpenOptions {
            create: true,
            ..Default::default()
        },
    )
    .expect("mkdir -p");
    write_file(&vfs, "a/b/deep.txt", b"1");
    write_file(&vfs, "a/mid.txt", b"2");
    write_file(&vfs, "top.txt", b"3");

    let mut walker = vfs.walk(Dir::ROOT).expect("walk");
    let mut seen = BTreeSet::new();
    while let Some(entry) = walker.next().expect("next") {
        assert_eq!(
            entry.depth,
            entry.path.bytes().filter(|&b| b == b'/').count() + 1
        );
        seen.insert(entry.path.to_string());
    }
    let expected: BTreeSet<String> = ["a", "a/b", "a/b/deep.txt", "a/mid.txt", "top.txt"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(seen, expected);
}
