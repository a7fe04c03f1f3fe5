//! Root filesystem provisioning.
//!
//! [`RootFs::generate`] stages a container root from a read-only prototype:
//! a fresh mount point bind-mounts the prototype read-only, and each
//! directory in [`OVERLAY_DIRS`] is then bind-mounted read-write from a
//! per-container scratch layer. The pipeline is all-or-nothing: every step
//! registers an undo action before the next step runs, and a failure
//! unwinds them in reverse order. [`RootFs::remove`] is the symmetric
//! teardown.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quilt_common::{QuiltError, QuiltResult};

use crate::fileutils::FileUtils;
use crate::syscall::SyscallFs;

/// Top-level directories overlaid writable on the prototype, in mount
/// order. Teardown runs in reverse order. The set is closed: no other
/// directory is overlaid.
pub const OVERLAY_DIRS: &[&str] = &["proc", "dev", "etc", "home", "sbin", "var", "tmp"];

/// Name prefix of per-container read-write layers under the base directory.
const RW_LAYER_PREFIX: &str = "tmp-rootfs-";

/// Name prefix of per-container mount points under the base directory.
const MOUNT_POINT_PREFIX: &str = "mnt-";

const TEMP_DIR_MODE: u32 = 0o777;

/// Reclamation policy for the read-write layer when a root is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RwReclaim {
    /// Leave the read-write layer behind. Reclaiming stale layers from the
    /// base directory is then the caller's business, e.g. a periodic sweep.
    #[default]
    Retain,
    /// Delete the read-write layer paired with the root in
    /// [`RootFs::remove`]. Under this policy the mount-point name is
    /// derived from the layer's unique suffix so the pair can be found
    /// again from the root path alone.
    Purge,
}

/// Provisions container root filesystems from a prototype.
///
/// The handle is immutable after construction, holds no OS resources of
/// its own, and may be shared across threads; concurrent `generate` calls
/// operate on disjoint directories by virtue of unique temp names.
pub struct RootFs {
    syscall: Arc<dyn SyscallFs>,
    fileutils: Arc<dyn FileUtils>,
    rw_base_dir: PathBuf,
    reclaim: RwReclaim,
}

impl std::fmt::Debug for RootFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFs")
            .field("rw_base_dir", &self.rw_base_dir)
            .field("reclaim", &self.reclaim)
            .finish_non_exhaustive()
    }
}

impl RootFs {
    /// Create a provisioner over the given writable base directory with the
    /// default [`RwReclaim::Retain`] policy.
    pub fn new(
        syscall: Option<Arc<dyn SyscallFs>>,
        fileutils: Arc<dyn FileUtils>,
        rw_base_dir: impl Into<PathBuf>,
    ) -> QuiltResult<Self> {
        Self::with_reclaim(syscall, fileutils, rw_base_dir, RwReclaim::default())
    }

    /// Create a provisioner with an explicit read-write layer reclamation
    /// policy.
    ///
    /// Fails with [`QuiltError::NilSyscallFs`] when no syscall adapter is
    /// supplied, and validates that the base directory exists, is a
    /// directory, and carries owner read-write permissions.
    pub fn with_reclaim(
        syscall: Option<Arc<dyn SyscallFs>>,
        fileutils: Arc<dyn FileUtils>,
        rw_base_dir: impl Into<PathBuf>,
        reclaim: RwReclaim,
    ) -> QuiltResult<Self> {
        let syscall = syscall.ok_or(QuiltError::NilSyscallFs)?;
        let rw_base_dir = rw_base_dir.into();

        let mode = fileutils
            .filemode(&rw_base_dir)
            .map_err(|e| QuiltError::RwBaseDirMissing {
                path: rw_base_dir.clone(),
                source: Box::new(e),
            })?;
        if !mode.is_dir() {
            return Err(QuiltError::RwBaseDirIsFile { path: rw_base_dir });
        }
        if mode.perm() & 0o600 != 0o600 {
            return Err(QuiltError::RwBaseDirNotRw {
                path: rw_base_dir,
                mode: mode.perm(),
            });
        }

        Ok(Self {
            syscall,
            fileutils,
            rw_base_dir,
            reclaim,
        })
    }

    /// Produce a usable root filesystem from the prototype at `prototype`.
    ///
    /// The prototype is not modified. On success the returned path is the
    /// fully provisioned root; on failure every side effect of the call has
    /// been undone and no path is returned.
    pub fn generate(&self, prototype: &Path) -> QuiltResult<PathBuf> {
        tracing::debug!(prototype = %prototype.display(), "Generating root filesystem");
        let mut undo = UndoStack::new();
        match self.provision(prototype, &mut undo) {
            Ok(root) => {
                // Success disarms the stack; the undo actions are dropped
                // without running.
                tracing::debug!(root = %root.display(), "Root filesystem generated");
                Ok(root)
            }
            Err(err) => {
                undo.unwind(&err);
                Err(err)
            }
        }
    }

    fn provision(&self, prototype: &Path, undo: &mut UndoStack) -> QuiltResult<PathBuf> {
        let rw_path = make_temp_dir(&self.rw_base_dir, RW_LAYER_PREFIX)
            .map_err(|e| QuiltError::CreateTempDir { source: e })?;
        undo.push({
            let rw_path = rw_path.clone();
            move |cause| remove_tree_logged(&rw_path, cause)
        });

        let root = self.allocate_mount_point(&rw_path)?;
        undo.push({
            let root = root.clone();
            move |cause| remove_tree_logged(&root, cause)
        });

        self.syscall
            .bind_mount_read_only(prototype, &root)
            .map_err(|e| QuiltError::BindMountRoot {
                prototype: prototype.to_path_buf(),
                root: root.clone(),
                source: Box::new(e),
            })?;
        undo.push({
            let syscall = Arc::clone(&self.syscall);
            let root = root.clone();
            move |cause| {
                if let Err(err) = syscall.unmount(&root) {
                    log_recovery_failure(&err, cause);
                }
            }
        });

        self.overlay(&root, &rw_path)?;
        Ok(root)
    }

    fn allocate_mount_point(&self, rw_path: &Path) -> QuiltResult<PathBuf> {
        match self.reclaim {
            RwReclaim::Retain => make_temp_dir(&self.rw_base_dir, MOUNT_POINT_PREFIX)
                .map_err(|e| QuiltError::CreateMountDir { source: e }),
            RwReclaim::Purge => {
                let suffix = rw_layer_suffix(rw_path).ok_or_else(|| QuiltError::Unexpected {
                    message: format!(
                        "malformed read-write layer path {}",
                        rw_path.display()
                    ),
                })?;
                let root = self
                    .rw_base_dir
                    .join(format!("{MOUNT_POINT_PREFIX}{suffix}"));
                fs::create_dir(&root).map_err(|e| QuiltError::CreateMountDir { source: e })?;
                Ok(root)
            }
        }
    }

    fn overlay(&self, root: &Path, rw_path: &Path) -> QuiltResult<()> {
        let tmp_dir = rw_path.join("tmp");
        fs::DirBuilder::new()
            .mode(TEMP_DIR_MODE)
            .create(&tmp_dir)
            .map_err(|e| QuiltError::OverlayTempDir {
                path: tmp_dir,
                source: e,
            })?;

        for (mounted, dir) in OVERLAY_DIRS.iter().enumerate() {
            if let Err(err) = self.overlay_directory(dir, root, rw_path) {
                for earlier in OVERLAY_DIRS[..mounted].iter().rev() {
                    if let Err(unmount_err) = self.syscall.unmount(&root.join(earlier)) {
                        log_recovery_failure(&unmount_err, &err);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn overlay_directory(&self, dir: &str, root: &Path, rw_path: &Path) -> QuiltResult<()> {
        let dir_path = rw_path.join(dir);
        let mnt_path = root.join(dir);

        if !self.fileutils.exists(&mnt_path) {
            return Err(QuiltError::RootSubdirMissing {
                dir: dir.to_string(),
                root: root.to_path_buf(),
            });
        }
        if !self.fileutils.exists(&dir_path) {
            self.fileutils
                .copy(&dir_path, &mnt_path)
                .map_err(|e| QuiltError::OverlayDir {
                    dir: dir.to_string(),
                    source: Box::new(e),
                })?;
        }

        tracing::debug!(
            source = %dir_path.display(),
            mount_point = %mnt_path.display(),
            "Overlaying directory read-write"
        );
        self.syscall
            .bind_mount_read_write(&dir_path, &mnt_path)
            .map_err(|e| QuiltError::BindMountSubdir {
                dir: dir.to_string(),
                source: Box::new(e),
            })
    }

    /// Tear down a root produced by [`RootFs::generate`].
    ///
    /// Overlay directories are unmounted in reverse mount order; the first
    /// unmount failure is collected and returned after the sweep, with
    /// later failures logged. The outer mount and the mount directory are
    /// then removed, followed by the paired read-write layer when the
    /// [`RwReclaim::Purge`] policy is in force.
    pub fn remove(&self, root: &Path) -> QuiltResult<()> {
        tracing::debug!(root = %root.display(), "Removing root filesystem");

        let mut first_err: Option<QuiltError> = None;
        for dir in OVERLAY_DIRS.iter().rev() {
            if let Err(err) = self.syscall.unmount(&root.join(dir)) {
                let err = QuiltError::UnmountSubdir {
                    dir: (*dir).to_string(),
                    source: Box::new(err),
                };
                match &first_err {
                    None => first_err = Some(err),
                    Some(original) => log_recovery_failure(&err, original),
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        self.syscall
            .unmount(root)
            .map_err(|e| QuiltError::UnmountRoot {
                root: root.to_path_buf(),
                source: Box::new(e),
            })?;
        fs::remove_dir_all(root).map_err(|e| QuiltError::RemoveMountDir {
            root: root.to_path_buf(),
            source: e,
        })?;

        if self.reclaim == RwReclaim::Purge {
            self.purge_rw_layer(root)?;
        }
        Ok(())
    }

    fn purge_rw_layer(&self, root: &Path) -> QuiltResult<()> {
        let suffix = root
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(MOUNT_POINT_PREFIX));
        let Some(suffix) = suffix else {
            tracing::warn!(
                root = %root.display(),
                "Root name does not carry the mount prefix; leaving read-write layer behind"
            );
            return Ok(());
        };
        let rw_path = self.rw_base_dir.join(format!("{RW_LAYER_PREFIX}{suffix}"));
        fs::remove_dir_all(&rw_path).map_err(|e| QuiltError::RemoveRwDir {
            path: rw_path.clone(),
            source: e,
        })
    }
}

/// Undo actions registered by completed steps, run in reverse registration
/// order when a later step fails. Each action receives the error that
/// triggered the unwind so its own failures can be logged against it.
/// Dropping the stack without unwinding discards the actions.
struct UndoStack {
    actions: Vec<Box<dyn FnOnce(&QuiltError)>>,
}

impl UndoStack {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: impl FnOnce(&QuiltError) + 'static) {
        self.actions.push(Box::new(action));
    }

    fn unwind(self, cause: &QuiltError) {
        for action in self.actions.into_iter().rev() {
            action(cause);
        }
    }
}

/// Atomically create a fresh, empty directory under `parent` with a name
/// beginning with `prefix`.
fn make_temp_dir(parent: &Path, prefix: &str) -> std::io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
    Ok(dir.keep())
}

fn rw_layer_suffix(rw_path: &Path) -> Option<&str> {
    rw_path
        .file_name()?
        .to_str()?
        .strip_prefix(RW_LAYER_PREFIX)
}

fn remove_tree_logged(path: &Path, cause: &QuiltError) {
    if let Err(err) = fs::remove_dir_all(path) {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            original = %cause,
            "Encountered error while recovering from earlier failure"
        );
    }
}

fn log_recovery_failure(err: &QuiltError, original: &QuiltError) {
    tracing::warn!(
        error = %err,
        original = %original,
        "Encountered error while recovering from earlier failure"
    );
}
