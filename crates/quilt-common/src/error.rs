//! Common error types for the Quilt ecosystem.
//!
//! Every failure surfaced by Quilt carries a variant of [`QuiltError`]. The
//! variant is the stable identity tests and callers match on; the message is
//! for humans, and the originating cause is wrapped as a source rather than
//! flattened into the text.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`QuiltError`].
pub type QuiltResult<T> = Result<T, QuiltError>;

/// Common errors across the Quilt ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum QuiltError {
    // ---- RootFs construction ----
    /// No syscall adapter was supplied.
    #[error("No filesystem syscall adapter supplied")]
    #[diagnostic(code(quilt::rootfs::nil_syscall_fs))]
    NilSyscallFs,

    /// The read-write base directory was not found.
    #[error("Read-write base directory not found: {}", .path.display())]
    #[diagnostic(code(quilt::rootfs::rw_base_dir_missing))]
    RwBaseDirMissing {
        /// The missing base directory.
        path: PathBuf,
        /// The underlying lookup failure.
        #[source]
        source: Box<QuiltError>,
    },

    /// A file was found in place of the read-write base directory.
    #[error("File found in place of read-write base directory: {}", .path.display())]
    #[diagnostic(code(quilt::rootfs::rw_base_dir_is_file))]
    RwBaseDirIsFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The read-write base directory lacks owner read-write permissions.
    #[error(
        "Read-write base directory does not have read and write permissions: {} has mode {mode:04o}",
        .path.display()
    )]
    #[diagnostic(
        code(quilt::rootfs::rw_base_dir_not_rw),
        help("The base directory must have at least mode 0600 for its owner")
    )]
    RwBaseDirNotRw {
        /// The base directory.
        path: PathBuf,
        /// The permission bits found.
        mode: u32,
    },

    // ---- RootFs generate ----
    /// The temporary directory for the read-write layer could not be created.
    #[error("Failed to create temporary directory for the read-write layer")]
    #[diagnostic(code(quilt::rootfs::create_temp_dir))]
    CreateTempDir {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The mount-point directory could not be created.
    #[error("Failed to create mount-point directory")]
    #[diagnostic(code(quilt::rootfs::create_mount_dir))]
    CreateMountDir {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The prototype could not be bind-mounted read-only at the root.
    #[error("Failed to bind mount {} read-only at {}", .prototype.display(), .root.display())]
    #[diagnostic(code(quilt::rootfs::bind_mount_root))]
    BindMountRoot {
        /// The prototype directory.
        prototype: PathBuf,
        /// The mount point.
        root: PathBuf,
        /// The underlying mount failure.
        #[source]
        source: Box<QuiltError>,
    },

    /// The `tmp` directory of the read-write layer could not be created.
    #[error("Failed to create tmp directory {}", .path.display())]
    #[diagnostic(code(quilt::rootfs::overlay_temp_dir))]
    OverlayTempDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An overlay subdirectory is missing from the mounted prototype.
    #[error("Overlay directory {dir:?} is missing from the root filesystem at {}", .root.display())]
    #[diagnostic(
        code(quilt::rootfs::root_subdir_missing),
        help("The prototype must contain every overlay subdirectory")
    )]
    RootSubdirMissing {
        /// The missing overlay directory name.
        dir: String,
        /// The root the directory was expected under.
        root: PathBuf,
    },

    /// An overlay subdirectory could not be seeded in the read-write layer.
    #[error("Failed to seed overlay directory {dir:?}")]
    #[diagnostic(code(quilt::rootfs::overlay_dir))]
    OverlayDir {
        /// The overlay directory name.
        dir: String,
        /// The underlying copy failure.
        #[source]
        source: Box<QuiltError>,
    },

    /// An overlay subdirectory could not be bind-mounted read-write.
    #[error("Failed to bind mount overlay directory {dir:?} read-write")]
    #[diagnostic(code(quilt::rootfs::bind_mount_subdir))]
    BindMountSubdir {
        /// The overlay directory name.
        dir: String,
        /// The underlying mount failure.
        #[source]
        source: Box<QuiltError>,
    },

    // ---- RootFs remove ----
    /// An overlay subdirectory could not be unmounted during removal.
    #[error("Failed to unmount overlay directory {dir:?}")]
    #[diagnostic(code(quilt::rootfs::unmount_subdir))]
    UnmountSubdir {
        /// The overlay directory name.
        dir: String,
        /// The underlying unmount failure.
        #[source]
        source: Box<QuiltError>,
    },

    /// The root mount could not be unmounted during removal.
    #[error("Failed to unmount root filesystem at {}", .root.display())]
    #[diagnostic(code(quilt::rootfs::unmount_root))]
    UnmountRoot {
        /// The root mount point.
        root: PathBuf,
        /// The underlying unmount failure.
        #[source]
        source: Box<QuiltError>,
    },

    /// The unmounted root directory could not be deleted.
    #[error("Failed to remove mount directory {}", .root.display())]
    #[diagnostic(code(quilt::rootfs::remove_mount_dir))]
    RemoveMountDir {
        /// The root mount point.
        root: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The paired read-write layer could not be deleted.
    #[error("Failed to remove read-write layer {}", .path.display())]
    #[diagnostic(code(quilt::rootfs::remove_rw_dir))]
    RemoveRwDir {
        /// The read-write layer directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    // ---- File utilities ----
    /// A file or directory was not found.
    #[error("File not found: {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::file_not_found))]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A source directory could not be opened.
    #[error("Failed to open source directory {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::opening_source_dir))]
    OpeningSourceDir {
        /// The source directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A source directory could not be listed.
    #[error("Failed to list source directory {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::cannot_list_source_dir))]
    CannotListSourceDir {
        /// The source directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An unexpected condition was encountered.
    #[error("Unexpected error: {message}")]
    #[diagnostic(code(quilt::fileutils::unexpected))]
    Unexpected {
        /// A description of the condition.
        message: String,
    },

    /// A target directory could not be created.
    #[error("Failed to create target directory {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::creating_target_dir))]
    CreatingTargetDir {
        /// The target directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A source file could not be opened.
    #[error("Failed to open source file {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::opening_source_file))]
    OpeningSourceFile {
        /// The source file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A target file could not be created.
    #[error("Failed to open target file {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::opening_target_file))]
    OpeningTargetFile {
        /// The target file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// File contents could not be copied.
    #[error("Failed to copy {} to {}", .src.display(), .dest.display())]
    #[diagnostic(code(quilt::fileutils::copying_file))]
    CopyingFile {
        /// The source file.
        src: PathBuf,
        /// The destination file.
        dest: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A source symbolic link could not be read.
    #[error("Failed to read symbolic link {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::reading_source_symlink))]
    ReadingSourceSymlink {
        /// The symbolic link.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A symbolic link could not be created at the destination.
    #[error("Failed to write symbolic link {}", .path.display())]
    #[diagnostic(code(quilt::fileutils::writing_target_symlink))]
    WritingTargetSymlink {
        /// The destination link path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A symbolic link points outside the tree being copied.
    #[error(
        "Cannot copy symbolic link {} with target {} which points outside the file or directory being copied {}",
        .link.display(),
        .target.display(),
        .top.display()
    )]
    #[diagnostic(code(quilt::fileutils::external_symlink))]
    ExternalSymlink {
        /// The symbolic link being copied.
        link: PathBuf,
        /// The link's resolved textual target.
        target: PathBuf,
        /// The top-level source acting as containment root.
        top: PathBuf,
    },

    // ---- Filesystem syscalls ----
    /// The syscall adapter requires root privileges.
    #[error("Effective user id {euid} is not root")]
    #[diagnostic(
        code(quilt::syscall::not_root),
        help("Bind mounts require CAP_SYS_ADMIN; run as root")
    )]
    NotRoot {
        /// The effective user id found.
        euid: u32,
    },

    /// A mount syscall failed.
    #[error("Failed to mount {} at {}", .src.display(), .mount_point.display())]
    #[diagnostic(code(quilt::syscall::mount))]
    Mount {
        /// The mount source.
        src: PathBuf,
        /// The mount point.
        mount_point: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// An unmount syscall failed.
    #[error("Failed to unmount {}", .mount_point.display())]
    #[diagnostic(code(quilt::syscall::unmount))]
    Unmount {
        /// The mount point.
        mount_point: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A bind mount stayed writable after a read-only remount.
    #[error("Failed to remount bind mount of {} read-only", .mount_point.display())]
    #[diagnostic(code(quilt::syscall::remount_read_only))]
    RemountReadOnly {
        /// The mount point.
        mount_point: PathBuf,
    },
}
