//! File entries produced by LIST and STAT

/// File type mask of a POSIX mode
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Metadata for one remote path
///
/// `name` is relative to the listed directory and empty for stat results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileEntry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,

    /// Extra fields only the V2 replies carry
    pub extended: Option<ExtendedStat>,
}

/// Fields of `STA2`/`LST2`/`DNT2` beyond mode, size and mtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedStat {
    /// Non-zero when the remote could not stat a listed entry
    pub errno: u32,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub ctime: i64,
}

impl FileEntry {
    pub fn is_directory(&self) -> bool {
        (self.mode & S_IFMT) == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        (self.mode & S_IFMT) == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFMT) == S_IFLNK
    }

    /// Permission bits (including setuid/setgid/sticky)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// V1 STAT answers a missing path with an all-zero record
    pub fn exists(&self) -> bool {
        self.mode != 0 || self.size != 0 || self.mtime != 0
    }
}
