use std::fs;
use std::io::{IoSlice, IoSliceMut};

use tempfile::TempDir;

use harha_core::{
    Dir, DirOpenOptions, FileOpenOptions, Kind, Permissions, SafePath, Vfs, VfsError,
};
use harha_host::PassthroughFs;
use harha_overlay::OverlayFs;

fn sp(s: &str) -> SafePath<'_> {
    SafePath::new(s).expect("valid path")
}

fn host_vfs(dir: &TempDir) -> Vfs {
    Vfs::new(
        PassthroughFs::new(dir.path()).expect("backend"),
        Permissions::all(),
    )
}

fn read_to_string(vfs: &Vfs, path: &str) -> String {
    let file = vfs
        .open_file(Dir::ROOT, sp(path), FileOpenOptions::default())
        .expect("open");
    let mut buf = [0u8; 64];
    let n = vfs
        .readv(file, &mut [IoSliceMut::new(&mut buf)])
        .expect("read");
    vfs.close_file(file);
    String::from_utf8(buf[..n].to_vec()).expect("utf-8")
}

#[test]
fn routing_and_unmount() {
    let dir_a = TempDir::new().expect("tempdir");
    let dir_b = TempDir::new().expect("tempdir");
    fs::write(dir_a.path().join("file1.txt"), b"A").expect("seed");
    fs::write(dir_b.path().join("file2.txt"), b"B").expect("seed");
    let vfs_a = host_vfs(&dir_a);
    let vfs_b = host_vfs(&dir_b);

    let overlay = OverlayFs::new();
    overlay.mount(&vfs_a, "/m1").expect("mount m1");
    overlay.mount(&vfs_b, "/m2").expect("mount m2");
    let vfs = Vfs::new(overlay.clone(), Permissions::all());

    assert_eq!(read_to_string(&vfs, "/m1/file1.txt"), "A");
    assert_eq!(read_to_string(&vfs, "/m2/file2.txt"), "B");

    overlay.unmount("/m1").expect("unmount");
    assert_eq!(vfs.stat(Dir::ROOT, sp("/m1")), Err(VfsError::FileNotFound));
    assert_eq!(
        vfs.stat(Dir::ROOT, sp("/m1/file1.txt")),
        Err(VfsError::FileNotFound)
    );
    assert_eq!(read_to_string(&vfs, "/m2/file2.txt"), "B");
}

#[test]
fn nested_mounts_prefer_the_later_mount() {
    let dir_outer = TempDir::new().expect("tempdir");
    let dir_inner = TempDir::new().expect("tempdir");
    fs::create_dir(dir_outer.path().join("test")).expect("seed");
    fs::write(dir_outer.path().join("test/file.txt"), b"first").expect("seed");
    fs::write(dir_inner.path().join("file.txt"), b"second").expect("seed");

    let overlay = OverlayFs::new();
    overlay.mount(&host_vfs(&dir_outer), "/data").expect("mount");
    overlay
        .mount(&host_vfs(&dir_inner), "/data/test")
        .expect("mount nested");
    let vfs = Vfs::new(overlay, Permissions::all());

    assert_eq!(read_to_string(&vfs, "/data/test/file.txt"), "second");
}

#[test]
fn unmount_closes_handles_belonging_to_the_child() {
    let dir_a = TempDir::new().expect("tempdir");
    fs::write(dir_a.path().join("f.txt"), b"x").expect("seed");
    let vfs_a = host_vfs(&dir_a);

    let overlay = OverlayFs::new();
    overlay.mount(&vfs_a, "/m").expect("mount");
    let vfs = Vfs::new(overlay.clone(), Permissions::all());

    let dir = vfs
        .open_dir(Dir::ROOT, sp("/m"), DirOpenOptions::default())
        .expect("open dir");
    let file = vfs
        .open_file(Dir::ROOT, sp("/m/f.txt"), FileOpenOptions::default())
        .expect("open file");

    overlay.unmount("/m").expect("unmount");

    // The overlay handles went stale together with the mount.
    assert_eq!(vfs.stat(dir, sp("f.txt")), Err(VfsError::FileNotFound));
    let mut buf = [0u8; 1];
    assert_eq!(
        vfs.readv(file, &mut [IoSliceMut::new(&mut buf)]),
        Err(VfsError::FileNotFound)
    );
}

#[test]
fn mount_validation() {
    let dir_a = TempDir::new().expect("tempdir");
    let vfs_a = host_vfs(&dir_a);
    let overlay = OverlayFs::new();

    assert_eq!(overlay.mount(&vfs_a, ""), Err(VfsError::InvalidPath));
    assert_eq!(
        overlay.mount(&vfs_a, "relative"),
        Err(VfsError::InvalidPath)
    );

    overlay.mount(&vfs_a, "/m").expect("mount");
    assert_eq!(
        overlay.mount(&vfs_a, "/elsewhere"),
        Err(VfsError::PathAlreadyExists),
        "one child may not be mounted twice"
    );

    let dir_b = TempDir::new().expect("tempdir");
    let vfs_b = host_vfs(&dir_b);
    assert_eq!(
        overlay.mount(&vfs_b, "/m"),
        Err(VfsError::PathAlreadyExists)
    );

    assert_eq!(overlay.unmount("/nope"), Err(VfsError::FileNotFound));
}

#[test]
fn relative_opens_resolve_inside_the_routed_child() {
    let dir_a = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir_a.path().join("sub")).expect("seed");
    fs::write(dir_a.path().join("sub/inner.txt"), b"inner").expect("seed");
    let vfs_a = host_vfs(&dir_a);

    let overlay = OverlayFs::new();
    overlay.mount(&vfs_a, "/m").expect("mount");
    let vfs = Vfs::new(overlay, Permissions::all());

    let mount_dir = vfs
        .open_dir(Dir::ROOT, sp("/m"), DirOpenOptions::default())
        .expect("open mount root");
    let sub = vfs
        .open_dir(mount_dir, sp("sub"), DirOpenOptions::default())
        .expect("open sub");
    assert_eq!(
        vfs.stat(sub, sp("inner.txt")).expect("stat").kind,
        Kind::File
    );

    let mut iter = vfs.iterate(sub).expect("iterate");
    let entry = iter.next().expect("next").expect("entry");
    assert_eq!(entry.basename, "inner.txt");
    assert!(iter.next().expect("next").is_none());
    iter.close();

    vfs.close_dir(sub);
    vfs.close_dir(mount_dir);
}

#[test]
fn child_capabilities_still_gate_forwarded_operations() {
    let dir_a = TempDir::new().expect("tempdir");
    fs::write(dir_a.path().join("f.txt"), b"x").expect("seed");
    // Child without ITERATE or WRITE.
    let vfs_a = Vfs::new(
        PassthroughFs::new(dir_a.path()).expect("backend"),
        Permissions::READ | Permissions::STAT,
    );

    let overlay = OverlayFs::new();
    overlay.mount(&vfs_a, "/m").expect("mount");
    let vfs = Vfs::new(overlay, Permissions::all());

    let dir = vfs
        .open_dir(Dir::ROOT, sp("/m"), DirOpenOptions::default())
        .expect("open dir");
    assert_eq!(vfs.iterate(dir).err(), Some(VfsError::PermissionDenied));

    let file = vfs
        .open_file(Dir::ROOT, sp("/m/f.txt"), FileOpenOptions::default())
        .expect("open file");
    assert_eq!(
        vfs.writev(file, &[IoSlice::new(b"y")]),
        Err(VfsError::PermissionDenied)
    );
    vfs.close_file(file);
    vfs.close_dir(dir);
}
