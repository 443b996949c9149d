//! Snapshots of experiment and framework sources into a log directory.

use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use log::{debug, info};
use walkdir::WalkDir;

/// The snapshot module's result type.
pub type Result<T> = std::result::Result<T, SnapshotErr>;

/// Extensions copied by `dump_base_experiment_code` when none are given.
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["rs", "toml", "json"];

const CODE_DIR: &str = "code";
const STAMP_FORMAT: &str = "%y%m%d.%H%M%S";

#[derive(Debug)]
pub enum SnapshotErr {
    Io { path: PathBuf, source: io::Error },
    Walk(walkdir::Error),
    /// The path has no final component to name the copy after.
    Unnamed(PathBuf),
}

impl fmt::Display for SnapshotErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotErr::Io { path, source } => write!(f, "{}: {source}", path.display()),
            SnapshotErr::Walk(e) => write!(f, "walk error: {e}"),
            SnapshotErr::Unnamed(path) => write!(f, "{} has no directory name", path.display()),
        }
    }
}

impl Error for SnapshotErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SnapshotErr::Io { source, .. } => Some(source),
            SnapshotErr::Walk(e) => Some(e),
            SnapshotErr::Unnamed(_) => None,
        }
    }
}

fn at(path: &Path) -> impl FnOnce(io::Error) -> SnapshotErr + '_ {
    move |source| SnapshotErr::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Returns the current UTC time formatted for directory names.
pub fn utcnow_stamp() -> String {
    Utc::now().format(STAMP_FORMAT).to_string()
}

/// Copies the framework sources and the experiment directory under `logdir/code`.
///
/// Each copy replaces whatever was there before and is named after its source
/// directory.
pub fn dump_code(expdir: &Path, logdir: &Path, framework_dir: &Path) -> Result<()> {
    let code_dir = logdir.join(CODE_DIR);

    for src in [framework_dir, expdir] {
        let src = fs::canonicalize(src).map_err(at(src))?;
        let name = src
            .file_name()
            .ok_or_else(|| SnapshotErr::Unnamed(src.clone()))?;

        replace_dir(&src, &code_dir.join(name))?;
    }

    info!("dumped code of {} into {}", expdir.display(), code_dir.display());
    Ok(())
}

/// Copies the top-level files of `src` with one of `extensions` into `dst`.
///
/// # Returns
/// How many files were copied.
pub fn dump_source_files(src: &Path, dst: &Path, extensions: &[&str]) -> Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(src).map_err(at(src))? {
        let path = entry.map_err(at(src))?.path();
        let wanted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));

        if wanted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for file in &files {
        // Every path came out of `read_dir`, so it has a name.
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dst.join(name);
        fs::copy(file, &target).map_err(at(&target))?;
        debug!("copied {}", file.display());
    }

    Ok(files.len())
}

/// Dumps the sources of an experiment into `dst/code`.
///
/// When `dst/code` already exists a timestamped `dst/code-<utc>` is used instead.
///
/// # Returns
/// The directory the sources were written to.
pub fn dump_base_experiment_code(src: &Path, dst: &Path, extensions: &[&str]) -> Result<PathBuf> {
    let mut target = dst.join(CODE_DIR);
    if target.exists() {
        target = dst.join(format!("{CODE_DIR}-{}", utcnow_stamp()));
    }

    fs::create_dir_all(&target).map_err(at(&target))?;
    let copied = dump_source_files(src, &target, extensions)?;

    info!("dumped {copied} source file(s) into {}", target.display());
    Ok(target)
}

/// Replaces `to` with a recursive copy of `from`.
pub fn replace_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(at(to))?;
    fs::remove_dir_all(to).map_err(at(to))?;

    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(SnapshotErr::Walk)?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(at(&target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(at(&target))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_has_expected_shape() {
        let stamp = utcnow_stamp();
        let (date, time) = stamp.split_once('.').unwrap();

        assert_eq!(date.len(), 6);
        assert_eq!(time.len(), 6);
        assert!(stamp.chars().all(|c| c.is_ascii_digit() || c == '.'));
    }

    #[test]
    fn unnamed_paths_are_reported() {
        let err = dump_code(Path::new("/"), Path::new("/tmp"), Path::new("/"));
        assert!(matches!(err, Err(SnapshotErr::Unnamed(_))));
    }
}
