//! The filesystem seam between the session machine and a backing store.
//!
//! A session never touches the operating system directly; it drives a
//! [`Filesystem`] and the [`File`] handles it hands out. Any provider
//! satisfying these traits is substitutable, which is also how the session
//! tests run against an in-memory tree.

use async_trait::async_trait;

use crate::fcall::{QId, Stat};
use crate::utils::Result;

/// Capability set a backing filesystem offers to the session.
///
/// All paths are canonical rooted slash-paths within the served tree
/// (`"/"`, `"/a/b.txt"`); translating them to any real location is the
/// provider's business.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Open the file or directory at `path`.
    ///
    /// `mode` is the 9P open mode byte (see [`crate::fcall::om`]): the low
    /// two bits select the access mode and `TRUNC` truncates on open.
    /// Directory opens succeed without holding any OS resource.
    async fn open(&self, path: &str, mode: u8) -> Result<Box<dyn File>>;

    /// Create an empty regular file. Fails with `AlreadyExists` if the
    /// path is occupied.
    async fn create_file(&self, path: &str) -> Result<()>;

    /// Create an empty directory. Fails with `AlreadyExists` if the path
    /// is occupied.
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// Stat every entry of the directory at `path`, in the provider's
    /// enumeration order. The order must be stable while the directory is
    /// unchanged; directory reads are sliced out of this sequence.
    async fn read_dir(&self, path: &str) -> Result<Vec<Stat>>;

    /// Remove the file or empty directory at `path`.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Stat the file or directory at `path`.
    async fn stat(&self, path: &str) -> Result<Stat>;

    /// Apply the writable fields of a proposed stat. Best-effort; this
    /// server acknowledges without changing anything.
    async fn wstat(&self, path: &str, stat: &Stat) -> Result<()>;
}

/// An open file or directory handle owned by exactly one fid.
#[async_trait]
pub trait File: Send + Sync {
    /// The qid captured when the handle was opened
    fn qid(&self) -> QId;

    /// Whether the handle names a directory
    fn is_dir(&self) -> bool;

    /// Metadata captured when the handle was opened
    async fn stat(&self) -> Result<Stat>;

    /// Read up to `count` bytes at `offset`. Short reads happen only at
    /// end of file. Must not be called on a directory handle; the session
    /// serves directory reads from [`Filesystem::read_dir`] instead.
    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>>;

    /// Write all of `data` at `offset`
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Release the handle. Idempotent; runs on every fid removal path
    /// including session teardown.
    async fn close(&self);
}
