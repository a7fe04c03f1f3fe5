//! # Quilt
//!
//! Quilt provisions per-container root filesystems. It takes a read-only
//! "prototype" directory tree and materialises an overlay at a fresh mount
//! point: the prototype is bind-mounted read-only, and a fixed set of
//! top-level directories is bind-mounted read-write from a per-container
//! scratch layer, producing a patchwork of writable directories over a
//! shared immutable image.
//!
//! No union filesystem is involved; only plain bind mounts. Provisioning is
//! all-or-nothing: a failure at any step undoes every earlier side effect
//! in reverse order.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use quilt::fileutils::StdFileUtils;
//! use quilt::rootfs::RootFs;
//! use quilt::syscall::LinuxSyscallFs;
//!
//! # fn example() -> quilt_common::QuiltResult<()> {
//! let syscall = Arc::new(LinuxSyscallFs::new()?);
//! let rootfs = RootFs::new(Some(syscall), Arc::new(StdFileUtils), "/var/lib/quilt")?;
//!
//! let root = rootfs.generate(Path::new("/var/lib/quilt/prototype"))?;
//! // ... run the container against `root` ...
//! rootfs.remove(&root)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod fileutils;
pub mod rootfs;
pub mod syscall;

pub use fileutils::{FileMode, FileUtils, StdFileUtils};
pub use rootfs::{RootFs, RwReclaim, OVERLAY_DIRS};
pub use syscall::SyscallFs;
#[cfg(target_os = "linux")]
pub use syscall::LinuxSyscallFs;
