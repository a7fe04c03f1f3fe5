//! End-to-end provisioning tests against the real kernel mount surface.
//!
//! These exercise actual bind mounts and therefore need an effective UID of
//! root; without it each test skips itself.
#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quilt::{LinuxSyscallFs, RootFs, RwReclaim, StdFileUtils, SyscallFs, OVERLAY_DIRS};
use quilt_common::QuiltError;
use tempfile::tempdir;

macro_rules! require_root {
    () => {
        match LinuxSyscallFs::new() {
            Ok(syscall) => syscall,
            Err(_) => {
                eprintln!("skipping: bind mounts require root privileges");
                return;
            }
        }
    };
}

fn create_prototype(parent: &Path) -> PathBuf {
    let proto = parent.join("test-prototype");
    fs::create_dir(&proto).unwrap();
    for dir in OVERLAY_DIRS {
        fs::create_dir(proto.join(dir)).unwrap();
    }
    proto
}

#[test]
fn bind_mount_read_write_round_trip() {
    let syscall = require_root!();

    let source = tempdir().unwrap();
    let mount_point = tempdir().unwrap();
    fs::write(source.path().join("seeded"), "present before mount").unwrap();

    syscall
        .bind_mount_read_write(source.path(), mount_point.path())
        .unwrap();

    assert!(mount_point.path().join("seeded").is_file());
    fs::write(mount_point.path().join("through-mount"), "x").unwrap();
    assert!(source.path().join("through-mount").is_file());

    syscall.unmount(mount_point.path()).unwrap();
    assert_eq!(fs::read_dir(mount_point.path()).unwrap().count(), 0);
}

#[test]
fn bind_mount_read_only_rejects_writes() {
    let syscall = require_root!();

    let source = tempdir().unwrap();
    let mount_point = tempdir().unwrap();
    fs::write(source.path().join("seeded"), "x").unwrap();

    syscall
        .bind_mount_read_only(source.path(), mount_point.path())
        .unwrap();

    assert!(mount_point.path().join("seeded").is_file());
    fs::write(mount_point.path().join("denied"), "x").unwrap_err();
    fs::create_dir(mount_point.path().join("denied-dir")).unwrap_err();

    syscall.unmount(mount_point.path()).unwrap();
}

#[test]
fn generate_overlays_writable_dirs_over_a_read_only_root() {
    let syscall = require_root!();

    let base = tempdir().unwrap();
    let proto_parent = tempdir().unwrap();
    let prototype = create_prototype(proto_parent.path());

    // home content must be carried into the generated root; tmp content
    // must not.
    fs::write(prototype.join("home").join("test.home"), "home file").unwrap();
    fs::write(prototype.join("tmp").join("test.tmp"), "tmp file").unwrap();

    let rootfs = RootFs::new(
        Some(Arc::new(syscall)),
        Arc::new(StdFileUtils),
        base.path(),
    )
    .unwrap();
    let root = rootfs.generate(&prototype).unwrap();

    assert!(root.starts_with(base.path()));
    assert!(root
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("mnt-"));

    // The read-only portion rejects writes.
    fs::write(root.join("test.root"), "x").unwrap_err();

    // Overlay directories are writable and persist the prototype's content.
    let home_file = root.join("home").join("test.home");
    assert!(home_file.is_file());
    fs::remove_file(&home_file).unwrap();

    let tmp_file = root.join("tmp").join("test.write");
    fs::write(&tmp_file, "x").unwrap();
    fs::remove_file(&tmp_file).unwrap();

    // tmp starts fresh regardless of the prototype's tmp.
    assert!(!root.join("tmp").join("test.tmp").exists());

    // The prototype itself was never modified.
    assert!(prototype.join("tmp").join("test.tmp").is_file());

    rootfs.remove(&root).unwrap();
    assert!(!root.exists());
}

#[test]
fn generate_fails_cleanly_when_the_prototype_lacks_a_subdir() {
    let syscall = require_root!();

    let base = tempdir().unwrap();
    let proto_parent = tempdir().unwrap();
    let prototype = create_prototype(proto_parent.path());
    fs::remove_dir(prototype.join("home")).unwrap();

    let rootfs = RootFs::new(
        Some(Arc::new(syscall)),
        Arc::new(StdFileUtils),
        base.path(),
    )
    .unwrap();

    let err = rootfs.generate(&prototype).unwrap_err();
    assert!(
        matches!(&err, QuiltError::RootSubdirMissing { dir, .. } if dir == "home"),
        "unexpected error {err}"
    );

    // No mount or temp directory survives the backout.
    assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
}

#[test]
fn purge_policy_reclaims_the_rw_layer_on_remove() {
    let syscall = require_root!();

    let base = tempdir().unwrap();
    let proto_parent = tempdir().unwrap();
    let prototype = create_prototype(proto_parent.path());

    let rootfs = RootFs::with_reclaim(
        Some(Arc::new(syscall)),
        Arc::new(StdFileUtils),
        base.path(),
        RwReclaim::Purge,
    )
    .unwrap();

    let root = rootfs.generate(&prototype).unwrap();
    rootfs.remove(&root).unwrap();

    assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
}
