//! Filesystem access used by the file and token collectors.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read-only view of a filesystem.
pub trait Filesystem: Send + Sync {
    fn dir_exists(&self, path: &Path) -> bool;

    /// Lazily yields every non-directory entry below `root`, in lexical order.
    ///
    /// An unreadable subdirectory yields one `Err` and the walk carries on with
    /// its siblings.
    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = io::Result<PathBuf>> + 'a>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// First line of the file without its line terminator. Empty for empty files.
    fn read_first_line(&self, path: &Path) -> io::Result<String>;

    /// Regular files directly inside `dir`, in lexical order.
    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = io::Result<PathBuf>> + 'a> {
        Box::new(Walk::new(root))
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_first_line(&self, path: &Path) -> io::Result<String> {
        let reader = BufReader::new(fs::File::open(path)?);
        match reader.lines().next() {
            Some(line) => line,
            None => Ok(String::new()),
        }
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in sorted_entries(dir)? {
            if fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Depth-first directory walk. Symlinked directories are not descended into.
pub struct Walk {
    pending: Vec<PathBuf>,
}

impl Walk {
    pub fn new(root: &Path) -> Self {
        Walk {
            pending: vec![root.to_path_buf()],
        }
    }
}

impl Iterator for Walk {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(path) = self.pending.pop() {
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => return Some(Err(e)),
            };
            if meta.is_dir() {
                match sorted_entries(&path) {
                    Ok(children) => self.pending.extend(children.into_iter().rev()),
                    Err(e) => return Some(Err(e)),
                }
                continue;
            }
            if meta.file_type().is_symlink()
                && fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
            {
                continue;
            }
            return Some(Ok(path));
        }
        None
    }
}
