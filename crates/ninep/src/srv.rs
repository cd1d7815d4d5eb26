//! Asynchronous server side 9P library.
//!
//! # Protocol
//! 9P2000

use {
    crate::{
        error::Error,
        fcall::*,
        fs::{File, Filesystem},
        serialize,
        utils::{self, Result},
    },
    bytes::buf::{Buf, BufMut},
    futures::sink::SinkExt,
    log::{debug, error, info},
    std::{collections::HashMap, sync::Arc},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::TcpListener,
    },
    tokio_stream::StreamExt,
    tokio_util::codec::{FramedWrite, length_delimited, length_delimited::LengthDelimitedCodec},
};

/// Framing for `size[4] type[1] tag[2] payload`, where the little-endian
/// size field counts itself.
fn framing() -> length_delimited::Builder {
    let mut builder = LengthDelimitedCodec::builder();
    builder
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian();
    builder
}

/// A fid table entry: a position in the served tree plus, once the fid has
/// been opened, the backing handle.
struct FidState {
    path: String,
    file: Option<Box<dyn File>>,
}

/// Per-connection protocol state: the version-negotiation latch, the
/// negotiated message size and the fid table.
///
/// A session is owned by exactly one connection task and processes its
/// messages strictly sequentially, so the fid table needs no locking.
struct Session<Fs> {
    fs: Arc<Fs>,
    received_version: bool,
    msize: u32,
    fids: HashMap<u32, FidState>,
}

impl<Fs: Filesystem> Session<Fs> {
    fn new(fs: Arc<Fs>) -> Session<Fs> {
        Session {
            fs,
            received_version: false,
            msize: 0,
            fids: HashMap::new(),
        }
    }

    /// Compute the reply body for one request, or an error. Errors with an
    /// `ename` become `RError` replies; the rest tear the session down.
    async fn dispatch(&mut self, msg: &Msg) -> Result<FCall> {
        if !self.received_version {
            return match msg.body {
                FCall::TVersion { msize, ref version } => self.version(msize, version),
                _ => Err(Error::UnexpectedMessage),
            };
        }

        match msg.body {
            FCall::TVersion { .. } => Err(Error::UnexpectedMessage),
            FCall::TAuth { .. } => Err(Error::NoAuthRequired),
            FCall::TAttach { fid, .. } => self.attach(fid).await,
            FCall::TFlush { .. } => Ok(FCall::RFlush),
            FCall::TWalk {
                fid,
                newfid,
                ref wnames,
            } => self.walk(fid, newfid, wnames).await,
            FCall::TOpen { fid, mode } => self.open(fid, mode).await,
            FCall::TCreate {
                fid,
                ref name,
                perm,
                mode: _,
            } => self.create(fid, name, perm).await,
            FCall::TRead { fid, offset, count } => self.read(fid, offset, count).await,
            FCall::TWrite {
                fid,
                offset,
                ref data,
            } => self.write(fid, offset, data).await,
            FCall::TClunk { fid } => self.clunk(fid).await,
            FCall::TRemove { fid } => self.remove(fid).await,
            FCall::TStat { fid } => self.stat(fid).await,
            FCall::TWStat { fid, ref stat } => self.wstat(fid, stat).await,
            // A client never legitimately sends R-messages.
            FCall::RVersion { .. }
            | FCall::RAuth { .. }
            | FCall::RAttach { .. }
            | FCall::RError { .. }
            | FCall::RFlush
            | FCall::RWalk { .. }
            | FCall::ROpen { .. }
            | FCall::RCreate { .. }
            | FCall::RRead { .. }
            | FCall::RWrite { .. }
            | FCall::RClunk
            | FCall::RRemove
            | FCall::RStat { .. }
            | FCall::RWStat => Err(Error::BadMessage),
        }
    }

    fn version(&mut self, msize: u32, version: &str) -> Result<FCall> {
        self.msize = msize.min(MAX_MSG_SIZE);
        if version != P92000 {
            return Ok(FCall::RVersion {
                msize: self.msize,
                version: VERSION_UNKNOWN.to_owned(),
            });
        }
        debug!("negotiated version {} msize {}", P92000, self.msize);
        self.received_version = true;
        Ok(FCall::RVersion {
            msize: self.msize,
            version: P92000.to_owned(),
        })
    }

    async fn attach(&mut self, fid: u32) -> Result<FCall> {
        let stat = self.fs.stat("/").await?;
        self.install_fid(fid, "/".to_owned(), None).await;
        Ok(FCall::RAttach { qid: stat.qid })
    }

    async fn walk(&mut self, fid: u32, newfid: u32, wnames: &[String]) -> Result<FCall> {
        let mut path = self.lookup(fid)?.path.clone();

        if wnames.is_empty() {
            // A zero-component walk clones the position, not the open
            // handle; handles stay owned by a single fid.
            if newfid != fid {
                self.install_fid(newfid, path, None).await;
            }
            return Ok(FCall::RWalk { wqids: Vec::new() });
        }

        let mut wqids = Vec::with_capacity(wnames.len());
        for name in wnames {
            path = utils::path_join(&path, name);
            let stat = self.fs.stat(&path).await?;
            wqids.push(stat.qid);
        }
        self.install_fid(newfid, path, None).await;
        Ok(FCall::RWalk { wqids })
    }

    async fn open(&mut self, fid: u32, mode: u8) -> Result<FCall> {
        let path = self.lookup(fid)?.path.clone();
        let file = self.fs.open(&path, mode).await?;
        let qid = file.qid();
        self.install_fid(fid, path, Some(file)).await;
        Ok(FCall::ROpen { qid, iounit: 0 })
    }

    async fn create(&mut self, fid: u32, name: &str, perm: u32) -> Result<FCall> {
        let dir = self.lookup(fid)?.path.clone();
        let path = utils::path_join(&dir, name);
        if perm & dm::DIR != 0 {
            self.fs.create_dir(&path).await?;
        } else {
            self.fs.create_file(&path).await?;
        }
        let file = self.fs.open(&path, om::RDWR).await?;
        let qid = file.qid();
        self.install_fid(fid, path, Some(file)).await;
        Ok(FCall::RCreate { qid, iounit: 0 })
    }

    async fn read(&mut self, fid: u32, offset: u64, count: u32) -> Result<FCall> {
        let state = self.lookup(fid)?;
        let file = state.file.as_ref().ok_or(Error::InvalidFid)?;
        if !file.is_dir() {
            let data = file.read(offset, count).await?;
            return Ok(FCall::RRead { data: Data(data) });
        }

        let path = state.path.clone();
        let listing = self.readdir_payload(&path).await?;
        let len = listing.len() as u64;
        let data = if offset < len {
            let end = (offset + count as u64).min(len);
            listing[offset as usize..end as usize].to_vec()
        } else {
            Vec::new()
        };
        Ok(FCall::RRead { data: Data(data) })
    }

    /// Serialize the full listing for a directory: the directory itself as
    /// `"."`, its parent as `".."`, then every entry in the provider's
    /// enumeration order. Each record carries its single inner length
    /// prefix. Recomputed per read; successive offsets slice one stable
    /// buffer layout.
    async fn readdir_payload(&self, path: &str) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        let mut dot = self.fs.stat(path).await?;
        dot.name = ".".to_owned();
        serialize::Encodable::encode(&dot, &mut buffer)?;

        let mut dotdot = self.fs.stat(&utils::path_join(path, "..")).await?;
        dotdot.name = "..".to_owned();
        serialize::Encodable::encode(&dotdot, &mut buffer)?;

        for stat in self.fs.read_dir(path).await? {
            serialize::Encodable::encode(&stat, &mut buffer)?;
        }
        Ok(buffer)
    }

    async fn write(&mut self, fid: u32, offset: u64, data: &Data) -> Result<FCall> {
        let state = self.lookup(fid)?;
        let file = state.file.as_ref().ok_or(Error::InvalidFid)?;
        file.write(offset, &data.0).await?;
        Ok(FCall::RWrite {
            count: data.0.len() as u32,
        })
    }

    async fn clunk(&mut self, fid: u32) -> Result<FCall> {
        let state = self.fids.remove(&fid).ok_or(Error::InvalidFid)?;
        if let Some(file) = state.file {
            file.close().await;
        }
        Ok(FCall::RClunk)
    }

    async fn remove(&mut self, fid: u32) -> Result<FCall> {
        // The fid goes away whether or not the deletion succeeds.
        let state = self.fids.remove(&fid).ok_or(Error::InvalidFid)?;
        if let Some(file) = state.file {
            file.close().await;
        }
        self.fs.remove(&state.path).await?;
        Ok(FCall::RRemove)
    }

    async fn stat(&self, fid: u32) -> Result<FCall> {
        let path = self.lookup(fid)?.path.clone();
        let stat = self.fs.stat(&path).await?;
        Ok(FCall::RStat { stat })
    }

    async fn wstat(&self, fid: u32, stat: &Stat) -> Result<FCall> {
        let path = self.lookup(fid)?.path.clone();
        self.fs.wstat(&path, stat).await?;
        Ok(FCall::RWStat)
    }

    fn lookup(&self, fid: u32) -> Result<&FidState> {
        self.fids.get(&fid).ok_or(Error::InvalidFid)
    }

    /// Install a fid, closing whatever handle an entry it displaces owned.
    async fn install_fid(&mut self, fid: u32, path: String, file: Option<Box<dyn File>>) {
        if let Some(old) = self.fids.insert(fid, FidState { path, file }) {
            if let Some(old_file) = old.file {
                old_file.close().await;
            }
        }
    }

    /// Release every handle in the fid table. Runs on all session exit
    /// paths including teardown after a fatal error.
    async fn clean(&mut self) {
        for (_, state) in self.fids.drain() {
            if let Some(file) = state.file {
                file.close().await;
            }
        }
    }
}

/// Encode and send one reply. The server only ever speaks R-messages.
async fn send_msg<W>(framed: &mut FramedWrite<W, LengthDelimitedCodec>, msg: &Msg) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if MsgType::from(&msg.body).is_t() {
        return Err(Error::BadMessage);
    }
    let mut writer = bytes::BytesMut::with_capacity(4096).writer();
    serialize::write_msg(&mut writer, msg)?;
    framed.send(writer.into_inner().freeze()).await?;
    Ok(())
}

/// Run one session over a connection, strictly sequentially: decode a
/// request, dispatch it, send the matched reply, repeat. Returns `Ok(())`
/// on a clean end of stream at a frame boundary.
async fn serve_conn<Fs, Reader, Writer>(fs: Arc<Fs>, reader: Reader, writer: Writer) -> Result<()>
where
    Fs: Filesystem,
    Reader: AsyncRead + Send + Unpin,
    Writer: AsyncWrite + Send + Unpin,
{
    let mut framedread = framing().new_read(reader);
    let mut framedwrite = framing().new_write(writer);
    let mut session = Session::new(fs);

    let result = loop {
        let frame = match framedread.next().await {
            None => break Ok(()),
            Some(Err(e)) => break Err(Error::Io(e)),
            Some(Ok(frame)) => frame,
        };

        let msg = match serialize::read_msg(&mut frame.reader()) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("undecodable message: {}", e);
                break Err(Error::BadMessage);
            }
        };
        debug!("← {:?}", msg);

        let reply = match session.dispatch(&msg).await {
            Ok(body) => Msg { tag: msg.tag, body },
            Err(e) => match e.ename() {
                Some(ename) => Msg {
                    tag: msg.tag,
                    body: FCall::RError {
                        ename: ename.to_owned(),
                    },
                },
                None => break Err(e),
            },
        };

        debug!("→ {:?}", reply);
        if let Err(e) = send_msg(&mut framedwrite, &reply).await {
            break Err(e);
        }
    };

    session.clean().await;
    result
}

/// Accept TCP connections on `addr` and serve an independent session per
/// connection. A failed accept is logged and the loop continues.
pub async fn srv_async<Fs>(filesystem: Fs, addr: &str) -> Result<()>
where
    Fs: Filesystem + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    let filesystem = Arc::new(filesystem);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                continue;
            }
        };
        info!("accepted: {:?}", peer);

        let fs = filesystem.clone();
        tokio::spawn(async move {
            let (readhalf, writehalf) = stream.into_split();
            match serve_conn(fs, readhalf, writehalf).await {
                Ok(()) => info!("connection closed: {:?}", peer),
                Err(e) => error!("connection failed: {:?}: {}", peer, e),
            }
        });
    }
}
