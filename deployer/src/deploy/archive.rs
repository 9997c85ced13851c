//! Deterministic zip packaging of a working directory.
//!
//! Entries are written in sorted order with a fixed timestamp and fixed permissions,
//! so identical trees always produce identical bytes. Version-control metadata and a
//! previously built archive at the root are never included.
//!
//! Symbolic links are followed when they resolve inside the tree: a link to a file is
//! stored as a file under the link's name, a link to a directory is walked under it.
//! A link that leaves the tree, dangles, or loops fails the packaging.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// File name of the packaged artifact
pub const ARCHIVE_NAME: &str = "app.zip";

/// Version-control entries skipped at any depth, whether directory, file or link.
/// A `.git` file is the gitlink of a worktree or submodule.
const EXCLUDED_NAMES: &[&str] = &[".git", ".hg", ".svn"];

/// A packaged archive held in memory
#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Bytes,

    /// Relative entry names, in archive order
    pub entries: Vec<String>,

    /// Hex SHA-256 of `bytes`
    pub digest: String,
}

impl Archive {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Package a directory tree into an archive
pub async fn package_directory(src: &Path) -> std::io::Result<Archive> {
    let src = src.to_owned();
    spawn_blocking(move || package_directory_sync(&src)).await?
}

/// Package in-memory files (name, contents) into an archive
pub fn package_files(files: &[(&str, &[u8])]) -> std::io::Result<Archive> {
    let mut sorted: Vec<(&str, &[u8])> = files.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::with_capacity(sorted.len());
    for (name, contents) in sorted {
        writer.start_file(name, file_options()).map_err(zip_error)?;
        writer.write_all(contents)?;
        entries.push(name.to_string());
    }
    finish(writer, entries)
}

fn package_directory_sync(src: &Path) -> std::io::Result<Archive> {
    let mut walker = TreeWalker::new(src)?;
    walker.walk_dir(src, Path::new(""))?;
    let mut files = walker.files;
    files.sort();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::with_capacity(files.len());
    for (relative, source) in files {
        let name = entry_name(&relative);
        let contents = std::fs::read(&source)?;
        writer.start_file(name.as_str(), file_options()).map_err(zip_error)?;
        writer.write_all(&contents)?;
        entries.push(name);
    }

    let archive = finish(writer, entries)?;
    debug!(
        entries = archive.entries.len(),
        size = archive.len(),
        "packaged working directory"
    );
    Ok(archive)
}

fn finish(writer: ZipWriter<Cursor<Vec<u8>>>, entries: Vec<String>) -> std::io::Result<Archive> {
    let bytes = writer.finish().map_err(zip_error)?.into_inner();
    let digest = hex_digest(&bytes);
    Ok(Archive {
        bytes: Bytes::from(bytes),
        entries,
        digest,
    })
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Collects `(entry path, file to read)` pairs below a root
struct TreeWalker {
    root: PathBuf,

    /// Canonical directories on the current walk path
    ancestors: Vec<PathBuf>,

    files: Vec<(PathBuf, PathBuf)>,
}

impl TreeWalker {
    fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: std::fs::canonicalize(root)?,
            ancestors: Vec::new(),
            files: Vec::new(),
        })
    }

    fn walk_dir(&mut self, dir: &Path, relative: &Path) -> std::io::Result<()> {
        let canonical = std::fs::canonicalize(dir)?;
        if self.ancestors.contains(&canonical) {
            return Err(invalid(format!("symlink loop at {}", entry_name(relative))));
        }
        self.ancestors.push(canonical);

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let relative = relative.join(entry.file_name());
            if is_excluded(&relative) {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                let target = self.resolve_link(&path, &relative)?;
                if target.is_dir() {
                    self.walk_dir(&target, &relative)?;
                } else {
                    self.files.push((relative, target));
                }
            } else if file_type.is_dir() {
                self.walk_dir(&path, &relative)?;
            } else if file_type.is_file() {
                self.files.push((relative, path));
            }
        }

        self.ancestors.pop();
        Ok(())
    }

    /// Resolve a link to its canonical target, which must stay inside the root
    fn resolve_link(&self, link: &Path, relative: &Path) -> std::io::Result<PathBuf> {
        let target = std::fs::canonicalize(link).map_err(|e| {
            invalid(format!("cannot resolve symlink {}: {}", entry_name(relative), e))
        })?;
        if !target.starts_with(&self.root) {
            return Err(invalid(format!(
                "symlink {} points outside the working directory",
                entry_name(relative)
            )));
        }
        Ok(target)
    }
}

fn is_excluded(relative: &Path) -> bool {
    if relative == Path::new(ARCHIVE_NAME) {
        return true;
    }
    relative
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| EXCLUDED_NAMES.contains(&name))
}

fn invalid(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Zip entry names always use forward slashes
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn zip_error(err: zip::result::ZipError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn unpacked_names(archive: &Archive) -> BTreeSet<String> {
        let zip = zip::ZipArchive::new(Cursor::new(archive.bytes.to_vec())).unwrap();
        zip.file_names().map(str::to_string).collect()
    }

    fn read_entry(archive: &Archive, name: &str) -> String {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes.to_vec())).unwrap();
        let mut contents = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut contents).unwrap();
        contents
    }

    #[tokio::test]
    async fn test_unpack_matches_tree_minus_exclusions() {
        let src = TempDir::new().unwrap();
        write(src.path(), "docker-compose.yml", "services: {}");
        write(src.path(), "src/main.py", "print('hi')");
        write(src.path(), "src/nested/deep/data.json", "{}");
        write(src.path(), ".git/HEAD", "ref: refs/heads/main");
        write(src.path(), ".git/objects/ab/cdef", "blob");
        write(src.path(), "app.zip", "stale archive");
        write(src.path(), "assets/app.zip", "not at root, kept");
        write(src.path(), ".gitignore", "target/");
        // Submodule checkout: `.git` is a gitlink file, not a directory
        write(src.path(), "libs/sub/.git", "gitdir: ../../.git/modules/sub");
        write(src.path(), "libs/sub/lib.rs", "pub fn f() {}");
        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            symlink("docker-compose.yml", src.path().join("compose.link.yml")).unwrap();
            symlink("src/nested", src.path().join("vendor")).unwrap();
        }

        let archive = package_directory(src.path()).await.unwrap();

        let mut expected: BTreeSet<String> = [
            ".gitignore",
            "assets/app.zip",
            "docker-compose.yml",
            "libs/sub/lib.rs",
            "src/main.py",
            "src/nested/deep/data.json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        #[cfg(unix)]
        expected.extend(["compose.link.yml".to_string(), "vendor/deep/data.json".to_string()]);
        assert_eq!(unpacked_names(&archive), expected);
        assert_eq!(archive.entries.iter().cloned().collect::<BTreeSet<_>>(), expected);

        assert_eq!(read_entry(&archive, "src/main.py"), "print('hi')");
        #[cfg(unix)]
        assert_eq!(read_entry(&archive, "compose.link.yml"), "services: {}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_leaving_the_tree_fails_packaging() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        write(outside.path(), "secrets.env", "TOKEN=x");

        let src = TempDir::new().unwrap();
        write(src.path(), "docker-compose.yml", "services: {}");
        symlink(outside.path().join("secrets.env"), src.path().join("secrets.env")).unwrap();

        let err = package_directory(src.path()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("secrets.env"));
        assert!(err.to_string().contains("outside the working directory"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_or_looping_links_fail_packaging() {
        use std::os::unix::fs::symlink;

        let dangling = TempDir::new().unwrap();
        write(dangling.path(), "main.py", "");
        symlink("missing.yml", dangling.path().join("config.yml")).unwrap();
        let err = package_directory(dangling.path()).await.unwrap_err();
        assert!(err.to_string().contains("cannot resolve symlink config.yml"));

        let looping = TempDir::new().unwrap();
        write(looping.path(), "src/main.py", "");
        symlink("..", looping.path().join("src/parent")).unwrap();
        let err = package_directory(looping.path()).await.unwrap_err();
        assert!(err.to_string().contains("symlink loop at src/parent"));
    }

    #[tokio::test]
    async fn test_packaging_is_deterministic() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        // Same tree, different creation order
        write(a.path(), "one.txt", "1");
        write(a.path(), "dir/two.txt", "2");
        write(b.path(), "dir/two.txt", "2");
        write(b.path(), "one.txt", "1");

        let first = package_directory(a.path()).await.unwrap();
        let second = package_directory(b.path()).await.unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.digest.len(), 64);
    }

    #[test]
    fn test_package_files() {
        let archive =
            package_files(&[("main.tf.json", b"{}".as_slice()), ("README", b"x".as_slice())])
                .unwrap();
        assert_eq!(archive.entries, vec!["README".to_string(), "main.tf.json".to_string()]);
        assert!(!archive.is_empty());
    }
}
