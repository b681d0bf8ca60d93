//! Source loading and path resolution strategies used by the module registry
//!
//! Both are pluggable so hosts can serve modules from memory, archives or any
//! other virtual file system. A loader reports a missing file with
//! [`io::ErrorKind::NotFound`]; every other error aborts resolution.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Reads module source bytes for a resolved path
pub trait SourceLoader: Send + Sync {
    /// Load the file at `path`.
    ///
    /// Return an error of kind [`io::ErrorKind::NotFound`] when the path does
    /// not name a readable file, including when it names a directory.
    fn load(&self, path: &Path) -> io::Result<Vec<u8>>;
}

impl<F> SourceLoader for F
where
    F: Fn(&Path) -> io::Result<Vec<u8>> + Send + Sync,
{
    fn load(&self, path: &Path) -> io::Result<Vec<u8>> {
        self(path)
    }
}

/// Loads modules from the host file system
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceLoader;

impl SourceLoader for FsSourceLoader {
    fn load(&self, path: &Path) -> io::Result<Vec<u8>> {
        let metadata = std::fs::metadata(path).map_err(normalize_missing)?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is a directory", path.display()),
            ));
        }
        std::fs::read(path).map_err(normalize_missing)
    }
}

/// Errors that only mean "nothing usable at this path" are folded into `NotFound`
fn normalize_missing(err: io::Error) -> io::Error {
    let missing = matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    );

    // ERROR_INVALID_NAME, reported for paths such as `C:\foo\C:\bar`
    #[cfg(windows)]
    let missing = missing || err.raw_os_error() == Some(123);

    if missing {
        io::Error::new(io::ErrorKind::NotFound, err)
    } else {
        err
    }
}

/// In-memory module sources keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemorySourceLoader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemorySourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, builder style
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        self.files.insert(clean(path.as_ref()), contents.into());
    }
}

impl SourceLoader for MemorySourceLoader {
    fn load(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(&clean(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }
}

/// Turns a request into a path relative to a base directory
pub trait PathResolver: Send + Sync {
    fn resolve(&self, base: &Path, request: &str) -> PathBuf;
}

/// Joins and cleans, then follows symlinks when the target exists.
///
/// Symlinked packages therefore share a single module instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPathResolver;

impl PathResolver for DefaultPathResolver {
    fn resolve(&self, base: &Path, request: &str) -> PathBuf {
        let joined = clean(&base.join(from_slash(request)));
        std::fs::canonicalize(&joined).unwrap_or(joined)
    }
}

/// Purely lexical join and clean, never touches the file system
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalPathResolver;

impl PathResolver for LexicalPathResolver {
    fn resolve(&self, base: &Path, request: &str) -> PathBuf {
        clean(&base.join(from_slash(request)))
    }
}

fn from_slash(request: &str) -> String {
    if cfg!(windows) {
        request.replace('/', "\\")
    } else {
        request.to_string()
    }
}

/// Lexically normalize a path: drop `.` segments and fold `..` into its parent.
///
/// Leading `..` segments of relative paths are kept, `..` directly under the
/// root is dropped, and an empty result becomes `.`.
pub fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        PathBuf::from(".")
    } else {
        parts.iter().collect()
    }
}

/// Directory part of a path, `.` when there is none
pub fn dir_of(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        return PathBuf::from(".");
    }
    match path.parent() {
        None => path.to_path_buf(),
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
    }
}

/// True for requests resolved against the file system rather than as packages
pub fn is_file_or_directory_path(request: &str) -> bool {
    let unix = request == "."
        || request == ".."
        || request.starts_with('/')
        || request.starts_with("./")
        || request.starts_with("../");
    if cfg!(windows) {
        unix || request.starts_with(".\\")
            || request.starts_with("..\\")
            || Path::new(request).is_absolute()
    } else {
        unix
    }
}

pub(crate) fn is_node_modules(path: &Path) -> bool {
    path.file_name() == Some(OsStr::new("node_modules"))
}

/// `path` with `suffix` appended to its final segment
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
