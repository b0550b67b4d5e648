use std::{
    fmt,
    fs::{File, Metadata},
    io,
    os::unix::prelude::MetadataExt,
    path::Path,
    time::SystemTime,
};

/// Value that tells physical files apart even when they are reachable by the same path.
///
/// Built from device id and inode number, so it survives renames and changes when a file is
/// deleted and recreated while the old one is still held open.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub dev: u64,
    pub inode: u64,
}

impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            inode: metadata.ino(),
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.inode)
    }
}

/// Metadata snapshot used to decide whether a file was rotated between two polls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub identity: FileIdentity,
    pub size: u64,
    pub modified: SystemTime,
    /// Number of hard links. Zero means the file was unlinked but is still held open.
    pub links: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        Ok(Self {
            identity: FileIdentity::from_metadata(metadata),
            size: metadata.len(),
            modified: metadata.modified()?,
            links: metadata.nlink(),
        })
    }

    /// Ask the filesystem for metadata of the object currently reachable by `path`
    pub fn of_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_metadata(&std::fs::metadata(path)?)
    }

    /// Metadata of an already open handle, regardless of what `path` points to now
    pub fn of_file(file: &File) -> io::Result<Self> {
        Self::from_metadata(&file.metadata()?)
    }
}

/// Same as `FileStat::of_path`, but a missing file is reported as `None` instead of an error
pub fn stat_if_exists(path: impl AsRef<Path>) -> io::Result<Option<FileStat>> {
    match FileStat::of_path(path) {
        Ok(stat) => Ok(Some(stat)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
