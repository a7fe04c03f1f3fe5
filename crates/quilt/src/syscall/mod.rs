//! Filesystem mount syscalls.
//!
//! A thin, uniform view of the kernel's mount surface, kept behind a trait
//! so the provisioner can be driven against a mock in tests and against the
//! kernel in production.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::LinuxSyscallFs;

use std::path::Path;

use quilt_common::QuiltResult;

/// Filesystem-related mount system calls.
pub trait SyscallFs: Send + Sync {
    /// Make `source` visible at `mount_point` via a writable bind mount.
    ///
    /// Both paths must exist and `mount_point` must be a directory. On
    /// failure no partial state is left behind.
    fn bind_mount_read_write(&self, source: &Path, mount_point: &Path) -> QuiltResult<()>;

    /// Make `source` visible at `mount_point` via a read-only bind mount.
    ///
    /// Implementations must guarantee the mount actually rejects writes
    /// before returning success.
    fn bind_mount_read_only(&self, source: &Path, mount_point: &Path) -> QuiltResult<()>;

    /// Unmount the given mount point.
    fn unmount(&self, mount_point: &Path) -> QuiltResult<()>;
}
