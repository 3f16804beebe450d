use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use itertools::Itertools;

use super::pattern::KeyPattern;
use super::{ObjectStore, StorageError};

const PARTIAL_SUFFIX: &str = ".partial";

/// Object store backed by a directory.  The key `a/b/c.csv` lives at
/// `<root>/a/b/c.csv`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .join("/");
                if !key.ends_with(PARTIAL_SUFFIX) {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<(), StorageError> {
        let target = self.path_for(key)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        // copy next to the target then rename, readers never see half a file
        let mut partial = OsString::from(target.as_os_str());
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);
        if let Err(e) = fs::copy(path, &partial).and_then(|_| fs::rename(&partial, &target)) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
        Ok(())
    }

    fn list(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let pattern = KeyPattern::new(pattern)?;
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.walk(&self.root, &mut keys)?;
        }
        keys.retain(|k| pattern.matches(k));
        keys.sort();
        Ok(keys)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.path_for(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> io::Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    #[test]
    fn put_list_open() -> Result<(), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let store = LocalStore::new(scratch.path().join("bucket"));
        let a = write(scratch.path(), "a.csv", "Comm\nCN\n")?;
        let b = write(scratch.path(), "b.txt", "hello")?;

        store.put_file("sgx-data/2025-03-17/a.csv", &a, "text/csv")?;
        store.put_file("sgx-data/2025-03-14/a.csv", &a, "text/csv")?;
        store.put_file("sgx-data/2025-03-14/b.txt", &b, "application/octet-stream")?;

        assert_eq!(
            store.list("sgx-data/*.csv")?,
            vec!["sgx-data/2025-03-14/a.csv", "sgx-data/2025-03-17/a.csv"]
        );
        assert_eq!(store.list("*")?.len(), 3);

        let mut content = String::new();
        store
            .open("sgx-data/2025-03-14/b.txt")?
            .read_to_string(&mut content)?;
        assert_eq!(content, "hello");
        Ok(())
    }

    #[test]
    fn put_overwrites() -> Result<(), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let store = LocalStore::new(scratch.path().join("bucket"));
        let first = write(scratch.path(), "first.csv", "1")?;
        let second = write(scratch.path(), "second.csv", "2")?;
        store.put_file("k/x.csv", &first, "text/csv")?;
        store.put_file("k/x.csv", &second, "text/csv")?;
        assert_eq!(store.list("k/*")?, vec!["k/x.csv"]);
        let mut content = String::new();
        store.open("k/x.csv")?.read_to_string(&mut content)?;
        assert_eq!(content, "2");
        Ok(())
    }

    #[test]
    fn missing_root_lists_nothing() -> Result<(), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let store = LocalStore::new(scratch.path().join("nope"));
        assert!(store.list("sgx-data/*.csv")?.is_empty());
        assert!(matches!(
            store.open("sgx-data/x.csv"),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn keys_cannot_escape_root() -> Result<(), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let store = LocalStore::new(scratch.path());
        let file = write(scratch.path(), "f.csv", "x")?;
        for key in ["../f.csv", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                store.put_file(key, &file, "text/csv"),
                Err(StorageError::InvalidKey(_))
            ));
        }
        Ok(())
    }
}
