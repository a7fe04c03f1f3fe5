//! File and directory copy utilities.
//!
//! The provisioner seeds each writable overlay directory by copying it out
//! of the mounted prototype. The copy preserves file modes, never follows
//! symbolic links, and refuses links that point outside the tree being
//! copied; contained links are rewritten in a relative, relocatable form.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use quilt_common::{paths, QuiltError, QuiltResult};
use rustix::fs::FileType;

/// Permission and type bits of a file, as reported by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

impl FileMode {
    /// Wrap a raw `st_mode` value.
    #[must_use]
    pub fn from_raw(mode: u32) -> Self {
        Self(mode)
    }

    /// The raw `st_mode` value.
    #[must_use]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Whether the mode describes a directory.
    #[must_use]
    pub fn is_dir(self) -> bool {
        FileType::from_raw_mode(self.0) == FileType::Directory
    }

    /// Whether the mode describes a symbolic link.
    #[must_use]
    pub fn is_symlink(self) -> bool {
        FileType::from_raw_mode(self.0) == FileType::Symlink
    }

    /// The permission bits, including setuid, setgid and sticky.
    #[must_use]
    pub fn perm(self) -> u32 {
        self.0 & 0o7777
    }
}

/// Semantic file and directory operations used by the provisioner.
pub trait FileUtils: Send + Sync {
    /// Recursively copy `src` to `dest`.
    ///
    /// Copying a file or directory to itself succeeds without modifying the
    /// filesystem. File modes are preserved. Symbolic links are copied as
    /// links, never followed, and must point inside the tree being copied.
    fn copy(&self, dest: &Path, src: &Path) -> QuiltResult<()>;

    /// Absence-only existence test.
    ///
    /// `false` is returned only when the path definitely does not exist;
    /// any other stat failure conservatively reports `true`. Callers must
    /// branch only on absence.
    fn exists(&self, path: &Path) -> bool;

    /// The [`FileMode`] of the file at `path`, without following symlinks.
    fn filemode(&self, path: &Path) -> QuiltResult<FileMode>;
}

/// `std::fs`-backed [`FileUtils`].
#[derive(Debug, Default)]
pub struct StdFileUtils;

impl FileUtils for StdFileUtils {
    fn copy(&self, dest: &Path, src: &Path) -> QuiltResult<()> {
        tracing::debug!(dest = %dest.display(), src = %src.display(), "Copying");
        let created_dest = !self.exists(dest);
        let result = self.do_copy(dest, src, src);
        if result.is_err() && created_dest {
            best_effort_remove(dest);
        }
        result
    }

    fn exists(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(_) => true,
            Err(err) => err.kind() != io::ErrorKind::NotFound,
        }
    }

    fn filemode(&self, path: &Path) -> QuiltResult<FileMode> {
        let meta = fs::symlink_metadata(path).map_err(|e| QuiltError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(FileMode::from_raw(meta.mode()))
    }
}

impl StdFileUtils {
    fn do_copy(&self, dest: &Path, src: &Path, top_src: &Path) -> QuiltResult<()> {
        if same_file(src, dest) {
            return Ok(());
        }
        let src_mode = self.filemode(src)?;
        if src_mode.is_symlink() {
            self.copy_symlink(dest, src, top_src)
        } else if src_mode.is_dir() {
            self.copy_dir(dest, src, top_src)
        } else {
            self.copy_file(dest, src)
        }
    }

    fn copy_dir(&self, dest: &Path, src: &Path, top_src: &Path) -> QuiltResult<()> {
        let final_dest = self.final_destination_dir(dest, src)?;

        let entries = fs::read_dir(src).map_err(|e| QuiltError::OpeningSourceDir {
            path: src.to_path_buf(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| QuiltError::CannotListSourceDir {
                path: src.to_path_buf(),
                source: e,
            })?;
            let name = entry.file_name();
            self.do_copy(&final_dest.join(&name), &src.join(&name), top_src)?;
        }
        Ok(())
    }

    /// Determine and create the effective destination directory.
    ///
    /// When `dest` does not exist it names the new directory; when it does,
    /// the source directory is copied into it under its own base name.
    fn final_destination_dir(&self, dest: &Path, src: &Path) -> QuiltResult<PathBuf> {
        let src_mode = self.filemode(src)?;
        let final_dest = match fs::metadata(dest) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => dest.to_path_buf(),
            Err(err) => {
                return Err(QuiltError::Unexpected {
                    message: format!("failed to stat {}: {err}", dest.display()),
                })
            }
            Ok(_) => match src.file_name() {
                Some(name) => dest.join(name),
                None => {
                    return Err(QuiltError::Unexpected {
                        message: format!("source {} has no base name", src.display()),
                    })
                }
            },
        };
        fs::DirBuilder::new()
            .recursive(true)
            .mode(src_mode.perm())
            .create(&final_dest)
            .map_err(|e| QuiltError::CreatingTargetDir {
                path: final_dest.clone(),
                source: e,
            })?;
        Ok(final_dest)
    }

    fn copy_file(&self, dest: &Path, src: &Path) -> QuiltResult<()> {
        let mut src_file = fs::File::open(src).map_err(|e| QuiltError::OpeningSourceFile {
            path: src.to_path_buf(),
            source: e,
        })?;
        let src_mode = self.filemode(src)?;
        let mut dest_file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(src_mode.perm())
            .open(dest)
            .map_err(|e| QuiltError::OpeningTargetFile {
                path: dest.to_path_buf(),
                source: e,
            })?;
        io::copy(&mut src_file, &mut dest_file).map_err(|e| QuiltError::CopyingFile {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    fn copy_symlink(&self, dest_link: &Path, src_link: &Path, top_src: &Path) -> QuiltResult<()> {
        let mut target =
            fs::read_link(src_link).map_err(|e| QuiltError::ReadingSourceSymlink {
                path: src_link.to_path_buf(),
                source: e,
            })?;

        // A target of the form ../x is anchored at the link's parent before
        // the containment check.
        if target.starts_with("..") {
            if let Some(parent) = src_link.parent() {
                target = paths::clean(&parent.join(&target));
            }
        }

        let top_relative =
            paths::relative(top_src, &target).ok_or_else(|| QuiltError::Unexpected {
                message: format!(
                    "cannot express {} relative to {}",
                    target.display(),
                    top_src.display()
                ),
            })?;
        if top_relative.starts_with("..") {
            return Err(QuiltError::ExternalSymlink {
                link: src_link.to_path_buf(),
                target,
                top: top_src.to_path_buf(),
            });
        }

        let link_parent = src_link.parent().ok_or_else(|| QuiltError::Unexpected {
            message: format!("symbolic link {} has no parent", src_link.display()),
        })?;
        let relative_target =
            paths::relative(link_parent, &target).ok_or_else(|| QuiltError::Unexpected {
                message: format!(
                    "cannot express {} relative to {}",
                    target.display(),
                    link_parent.display()
                ),
            })?;

        tracing::debug!(
            link = %src_link.display(),
            target = %target.display(),
            relative = %relative_target.display(),
            "Recreating symbolic link"
        );
        symlink(&relative_target, dest_link).map_err(|e| QuiltError::WritingTargetSymlink {
            path: dest_link.to_path_buf(),
            source: e,
        })
    }
}

/// Device+inode identity check, so distinct paths resolving to the same
/// file are detected as a self-copy. Stat failures report "not the same".
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

fn best_effort_remove(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Err(_) => return,
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
    };
    if let Err(err) = result {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            "Failed to remove partial copy destination"
        );
    }
}
