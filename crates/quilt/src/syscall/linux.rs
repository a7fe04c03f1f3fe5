//! Linux implementation of [`SyscallFs`].

use std::ffi::CString;
use std::path::Path;

use quilt_common::{QuiltError, QuiltResult};
use rustix::mount::{mount, unmount, MountFlags, UnmountFlags};

use super::SyscallFs;

/// Name prefix of the probe directory used to verify a mount is read-only.
const RO_PROBE_PREFIX: &str = "quilt-ro-probe-";

/// Kernel-backed [`SyscallFs`].
///
/// Construction requires an effective user id of root: bind mounts need
/// CAP_SYS_ADMIN in practice, and refusing early keeps that failure distinct
/// from runtime mount errors.
#[derive(Debug)]
pub struct LinuxSyscallFs {
    _priv: (),
}

impl LinuxSyscallFs {
    /// Create a new adapter, failing with [`QuiltError::NotRoot`] when the
    /// effective user id is non-zero.
    pub fn new() -> QuiltResult<Self> {
        let euid = rustix::process::geteuid();
        if !euid.is_root() {
            return Err(QuiltError::NotRoot {
                euid: euid.as_raw(),
            });
        }
        Ok(Self { _priv: () })
    }

    fn bind_mount(&self, source: &Path, mount_point: &Path, flags: MountFlags) -> QuiltResult<()> {
        let empty = CString::new("").unwrap();
        mount(source, mount_point, empty.as_c_str(), flags, empty.as_c_str()).map_err(|e| {
            QuiltError::Mount {
                src: source.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
                source: e.into(),
            }
        })
    }

    fn remount(&self, source: &Path, mount_point: &Path, flags: MountFlags) -> QuiltResult<()> {
        let empty = CString::new("").unwrap();
        rustix::mount::mount_remount(mount_point, flags, empty.as_c_str()).map_err(|e| {
            QuiltError::Mount {
                src: source.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
                source: e.into(),
            }
        })
    }

    /// Check whether `mount_point` rejects directory creation.
    ///
    /// A successfully created probe directory means the mount is writable;
    /// the probe is removed again and any failure to do so is logged, not
    /// propagated.
    fn check_read_only(&self, mount_point: &Path) -> bool {
        match tempfile::Builder::new()
            .prefix(RO_PROBE_PREFIX)
            .tempdir_in(mount_point)
        {
            Err(_) => true,
            Ok(probe) => {
                if let Err(err) = probe.close() {
                    tracing::warn!(
                        mount_point = %mount_point.display(),
                        error = %err,
                        "Failed to delete probe directory used to check read-only bind mount"
                    );
                }
                false
            }
        }
    }
}

impl SyscallFs for LinuxSyscallFs {
    fn bind_mount_read_write(&self, source: &Path, mount_point: &Path) -> QuiltResult<()> {
        tracing::debug!(
            source = %source.display(),
            mount_point = %mount_point.display(),
            "Creating read-write bind mount"
        );
        self.bind_mount(source, mount_point, MountFlags::BIND)
    }

    fn bind_mount_read_only(&self, source: &Path, mount_point: &Path) -> QuiltResult<()> {
        tracing::debug!(
            source = %source.display(),
            mount_point = %mount_point.display(),
            "Creating read-only bind mount"
        );

        // On Linux a read-only bind mount may silently come back writable;
        // verify, and remount read-only when it does.
        self.bind_mount(source, mount_point, MountFlags::BIND | MountFlags::RDONLY)?;
        if self.check_read_only(mount_point) {
            return Ok(());
        }

        tracing::debug!(mount_point = %mount_point.display(), "Remounting bind mount read-only");
        if let Err(err) = self.remount(
            source,
            mount_point,
            MountFlags::BIND | MountFlags::RDONLY,
        ) {
            if let Err(unmount_err) = self.unmount(mount_point) {
                tracing::warn!(
                    mount_point = %mount_point.display(),
                    error = %unmount_err,
                    original = %err,
                    "Failed to undo bind mount while recovering from remount failure"
                );
            }
            return Err(err);
        }

        if !self.check_read_only(mount_point) {
            let err = QuiltError::RemountReadOnly {
                mount_point: mount_point.to_path_buf(),
            };
            if let Err(unmount_err) = self.unmount(mount_point) {
                tracing::warn!(
                    mount_point = %mount_point.display(),
                    error = %unmount_err,
                    original = %err,
                    "Failed to undo bind mount while recovering from failure to remount read-only"
                );
            }
            return Err(err);
        }

        tracing::debug!(mount_point = %mount_point.display(), "Bind mount verified read-only");
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> QuiltResult<()> {
        tracing::debug!(mount_point = %mount_point.display(), "Unmounting");
        unmount(mount_point, UnmountFlags::empty()).map_err(|e| QuiltError::Unmount {
            mount_point: mount_point.to_path_buf(),
            source: e.into(),
        })
    }
}
