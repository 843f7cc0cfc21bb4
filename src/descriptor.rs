use crate::error::{Error, Result};
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;
use tracing::debug;

/// Access mode of an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Option name that requests this mode, without the leading dashes.
    pub fn option(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "rdonly",
            AccessMode::WriteOnly => "wronly",
            AccessMode::ReadWrite => "rdwr",
        }
    }

    fn flags(self) -> OFlag {
        match self {
            AccessMode::ReadOnly => OFlag::O_RDONLY,
            AccessMode::WriteOnly => OFlag::O_WRONLY,
            AccessMode::ReadWrite => OFlag::O_RDWR,
        }
    }
}

/// A one-shot flag that applies to the next open only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Append,
    Cloexec,
    Creat,
    Directory,
    Dsync,
    Excl,
    Nofollow,
    Nonblock,
    Rsync,
    Sync,
    Trunc,
}

impl Modifier {
    pub const ALL: [Modifier; 11] = [
        Modifier::Append,
        Modifier::Cloexec,
        Modifier::Creat,
        Modifier::Directory,
        Modifier::Dsync,
        Modifier::Excl,
        Modifier::Nofollow,
        Modifier::Nonblock,
        Modifier::Rsync,
        Modifier::Sync,
        Modifier::Trunc,
    ];

    pub fn option(self) -> &'static str {
        match self {
            Modifier::Append => "append",
            Modifier::Cloexec => "cloexec",
            Modifier::Creat => "creat",
            Modifier::Directory => "directory",
            Modifier::Dsync => "dsync",
            Modifier::Excl => "excl",
            Modifier::Nofollow => "nofollow",
            Modifier::Nonblock => "nonblock",
            Modifier::Rsync => "rsync",
            Modifier::Sync => "sync",
            Modifier::Trunc => "trunc",
        }
    }

    pub fn from_option(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.option() == name)
    }

    fn flag(self) -> OFlag {
        match self {
            Modifier::Append => OFlag::O_APPEND,
            Modifier::Cloexec => OFlag::O_CLOEXEC,
            Modifier::Creat => OFlag::O_CREAT,
            Modifier::Directory => OFlag::O_DIRECTORY,
            Modifier::Dsync => OFlag::O_DSYNC,
            Modifier::Excl => OFlag::O_EXCL,
            Modifier::Nofollow => OFlag::O_NOFOLLOW,
            Modifier::Nonblock => OFlag::O_NONBLOCK,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Modifier::Rsync => OFlag::O_RSYNC,
            // O_RSYNC has no separate value elsewhere; read-side sync is implied by O_SYNC.
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            Modifier::Rsync => OFlag::O_SYNC,
            Modifier::Sync => OFlag::O_SYNC,
            Modifier::Trunc => OFlag::O_TRUNC,
        }
    }
}

/// The table of descriptors opened by the directive stream.
///
/// Entries are only ever appended, so an index handed out once keeps naming
/// the same entry for the whole run. A failed open or pipe still occupies its
/// slot(s), leaving them closed. Dropping the table releases every entry that
/// is still open.
#[derive(Debug)]
pub struct DescriptorTable {
    entries: Vec<Option<OwnedFd>>,
    pending: OFlag,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending: OFlag::empty(),
        }
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries ever created, open or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_open(&self, index: usize) -> bool {
        matches!(self.entries.get(index), Some(Some(_)))
    }

    /// Raw descriptor behind an open entry.
    pub fn raw(&self, index: usize) -> Option<RawFd> {
        self.entries.get(index)?.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Raw descriptors of every entry that is currently open.
    pub fn open_raw_fds(&self) -> Vec<RawFd> {
        self.entries
            .iter()
            .flatten()
            .map(AsRawFd::as_raw_fd)
            .collect()
    }

    /// Enable a modifier for the next [`open`](Self::open).
    pub fn add_modifier(&mut self, modifier: Modifier) {
        self.pending |= modifier.flag();
    }

    /// Open `path` and append it to the table.
    ///
    /// Pending modifiers are consumed whatever the outcome. On failure a
    /// closed entry is appended anyway and its index is `len() - 1`.
    pub fn open(&mut self, path: &Path, access: AccessMode) -> Result<usize> {
        let flags = access.flags() | std::mem::replace(&mut self.pending, OFlag::empty());
        let mode = Mode::from_bits_truncate(0o644);
        let opened = fcntl::open(path, flags, mode);
        let index = self.entries.len();
        match opened {
            Ok(fd) => {
                // SAFETY: `open` just returned this descriptor and nothing else owns it.
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                debug!(index, fd, path = %path.display(), ?flags, "opened");
                self.entries.push(Some(owned));
                Ok(index)
            }
            Err(source) => {
                self.entries.push(None);
                Err(Error::Open {
                    option: access.option(),
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Create an anonymous pipe, appending its read end then its write end.
    pub fn pipe(&mut self) -> Result<(usize, usize)> {
        let read = self.entries.len();
        match unistd::pipe() {
            Ok((r, w)) => {
                debug!(read, write = read + 1, "pipe created");
                self.entries.push(Some(r));
                self.entries.push(Some(w));
                Ok((read, read + 1))
            }
            Err(source) => {
                self.entries.push(None);
                self.entries.push(None);
                Err(Error::Pipe(source))
            }
        }
    }

    /// Release the descriptor at `index`.
    ///
    /// The entry is closed afterwards even when the release call fails.
    pub fn close(&mut self, index: usize) -> Result<()> {
        let count = self.entries.len();
        let slot = self.entries.get_mut(index).ok_or(Error::OutOfRange {
            option: "close",
            index,
            count,
        })?;
        let fd = slot.take().ok_or(Error::AlreadyClosed { index })?;
        debug!(index, fd = fd.as_raw_fd(), "closing");
        unistd::close(fd.into_raw_fd()).map_err(|source| Error::Close { index, source })
    }
}
