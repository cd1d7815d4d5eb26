//! Local-directory provider: serves a subtree of the host filesystem.

use {
    async_trait::async_trait,
    log::{debug, warn},
    ninep::{
        Error, QId, QIdType, Result, Stat, om,
        fs::{File, Filesystem},
        utils::{path_clean, path_join},
    },
    std::{
        collections::HashMap,
        io::{self, SeekFrom},
        os::unix::fs::{MetadataExt, PermissionsExt},
        path::PathBuf,
        sync::Mutex as StdMutex,
    },
    tokio::{
        fs,
        io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
        sync::Mutex,
    },
};

/// Translate an OS failure into the protocol error taxonomy. Anything
/// without a dedicated kind is reported as a plain i/o error, with the
/// original failure kept in the log.
fn fs_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::DoesNotExist,
        io::ErrorKind::AlreadyExists => Error::AlreadyExists,
        io::ErrorKind::DirectoryNotEmpty => Error::DirectoryNotEmpty,
        _ => {
            warn!("filesystem error: {}", e);
            Error::Io(e)
        }
    }
}

/// Assigns stable qid paths to canonical path strings.
///
/// Entries are never evicted, so a path keeps its qid path for the
/// provider's lifetime even across deletion and recreation.
struct QidRegistry {
    paths: HashMap<String, u64>,
    next: u64,
}

/// Serves a local directory subtree. Incoming paths are canonicalized
/// textually and joined under the export root, so `..` cannot escape it.
pub struct LocalFs {
    base: PathBuf,
    qids: StdMutex<QidRegistry>,
}

impl LocalFs {
    pub fn new(base: PathBuf) -> LocalFs {
        LocalFs {
            base,
            qids: StdMutex::new(QidRegistry {
                paths: HashMap::new(),
                next: 0,
            }),
        }
    }

    /// Map a canonical tree path onto the host filesystem.
    fn real_path(&self, cpath: &str) -> PathBuf {
        let mut real = self.base.clone();
        for comp in cpath.split('/').filter(|c| !c.is_empty()) {
            real.push(comp);
        }
        real
    }

    /// Look up or assign the qid path for a canonical path string.
    fn qid_path(&self, cpath: &str) -> u64 {
        let mut registry = self.qids.lock().unwrap();
        if let Some(&qid_path) = registry.paths.get(cpath) {
            return qid_path;
        }
        let qid_path = registry.next;
        registry.next += 1;
        registry.paths.insert(cpath.to_owned(), qid_path);
        qid_path
    }

    fn stat_for(&self, cpath: &str, meta: &std::fs::Metadata) -> Stat {
        let typ = QIdType::from_is_dir(meta.is_dir());
        let name = match cpath.rsplit_once('/') {
            Some((_, last)) if !last.is_empty() => last.to_owned(),
            _ => "/".to_owned(),
        };
        Stat {
            stype: 0,
            dev: 0,
            qid: QId {
                typ,
                version: meta.mtime() as u32,
                path: self.qid_path(cpath),
            },
            mode: (meta.permissions().mode() & 0o777) | ((typ.bits() as u32) << 24),
            atime: meta.atime() as u32,
            mtime: meta.mtime() as u32,
            length: if meta.is_dir() { 0 } else { meta.len() },
            name,
            uid: "?".to_owned(),
            gid: "?".to_owned(),
            muid: String::new(),
        }
    }
}

/// An open handle. Directory handles hold no OS file; file handles own a
/// seekable OS file behind a mutex so reads and writes can position it.
pub struct LocalFile {
    file: Mutex<Option<fs::File>>,
    stat: Stat,
}

#[async_trait]
impl Filesystem for LocalFs {
    async fn open(&self, path: &str, mode: u8) -> Result<Box<dyn File>> {
        let cpath = path_clean(path);
        let real = self.real_path(&cpath);
        let meta = fs::metadata(&real).await.map_err(fs_error)?;
        let stat = self.stat_for(&cpath, &meta);

        if meta.is_dir() {
            return Ok(Box::new(LocalFile {
                file: Mutex::new(None),
                stat,
            }));
        }

        let mut options = fs::OpenOptions::new();
        match mode & om::ACCESS_MASK {
            om::WRITE => options.write(true),
            om::RDWR => options.read(true).write(true),
            // EXEC is read with execute permission checked client side
            _ => options.read(true),
        };
        if mode & om::TRUNC != 0 {
            options.write(true).truncate(true);
        }
        let file = options.open(&real).await.map_err(fs_error)?;
        Ok(Box::new(LocalFile {
            file: Mutex::new(Some(file)),
            stat,
        }))
    }

    async fn create_file(&self, path: &str) -> Result<()> {
        let real = self.real_path(&path_clean(path));
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&real)
            .await
            .map_err(fs_error)?;
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let real = self.real_path(&path_clean(path));
        fs::create_dir(&real).await.map_err(fs_error)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Stat>> {
        let cpath = path_clean(path);
        let mut entries = fs::read_dir(self.real_path(&cpath)).await.map_err(fs_error)?;
        let mut stats = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(fs_error)? {
            let meta = entry.metadata().await.map_err(fs_error)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            stats.push(self.stat_for(&path_join(&cpath, &name), &meta));
        }
        Ok(stats)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let real = self.real_path(&path_clean(path));
        let meta = fs::symlink_metadata(&real).await.map_err(fs_error)?;
        if meta.is_dir() {
            fs::remove_dir(&real).await.map_err(fs_error)
        } else {
            fs::remove_file(&real).await.map_err(fs_error)
        }
    }

    async fn stat(&self, path: &str) -> Result<Stat> {
        let cpath = path_clean(path);
        let meta = fs::metadata(self.real_path(&cpath)).await.map_err(fs_error)?;
        Ok(self.stat_for(&cpath, &meta))
    }

    async fn wstat(&self, path: &str, _stat: &Stat) -> Result<()> {
        // Acknowledged without effect.
        debug!("wstat acknowledged for {}", path);
        Ok(())
    }
}

#[async_trait]
impl File for LocalFile {
    fn qid(&self) -> QId {
        self.stat.qid
    }

    fn is_dir(&self) -> bool {
        self.stat.qid.typ.contains(QIdType::DIR)
    }

    async fn stat(&self) -> Result<Stat> {
        Ok(self.stat.clone())
    }

    async fn read(&self, offset: u64, count: u32) -> Result<Vec<u8>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::InvalidFid)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(fs_error)?;

        // Fill the requested count; a short read only happens at EOF.
        let mut buf = vec![0; count as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await.map_err(fs_error)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::InvalidFid)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(fs_error)?;
        file.write_all(data).await.map_err(fs_error)
    }

    async fn close(&self) {
        self.file.lock().await.take();
    }
}
