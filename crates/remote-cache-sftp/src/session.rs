//! SFTP session over an established byte stream
//!
//! [`SftpSession`] speaks protocol version 3 over anything that implements
//! `AsyncRead + AsyncWrite`; over SSH that is the "sftp" subsystem channel.
//! One request is outstanding at a time: each call writes a packet and waits
//! for the reply carrying the same request id.

use crate::protocol::{
    FileAttrs, MAX_PACKET_LEN, MessageType, OpenFlags, SFTP_VERSION, StatusCode, codec,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use remote_cache_core::progress::{FileTransfer, TransferKind};
use remote_cache_core::{EntryKind, ProgressSink, RemoteEntry};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Bytes requested per `SSH_FXP_READ` / sent per `SSH_FXP_WRITE`.
/// Servers must accept at least 32768 bytes of data per packet.
pub const CHUNK_SIZE: u32 = 32 * 1024;

/// Run `future`, failing with [`Error::Timeout`] once `limit` elapses
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, action: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::Timeout(format!("{} ({} ms)", action, limit.as_millis())))?,
        None => future.await,
    }
}

/// One entry of an `SSH_FXP_NAME` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Bare entry name
    pub filename: String,
    /// `ls -l` style line, used when attributes lack permission bits
    pub longname: String,
    /// Entry attributes
    pub attrs: FileAttrs,
}

impl NameEntry {
    fn kind(&self) -> EntryKind {
        self.attrs
            .kind()
            .unwrap_or_else(|| match self.longname.chars().next() {
                Some('d') => EntryKind::Dir,
                Some('-') => EntryKind::File,
                Some('l') => EntryKind::Symlink,
                _ => EntryKind::Other,
            })
    }
}

/// Server reply to a single request
#[derive(Debug)]
enum Response {
    Status { code: StatusCode, message: String },
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Name(Vec<NameEntry>),
    Attrs(FileAttrs),
}

impl Response {
    fn describe(&self) -> &'static str {
        match self {
            Response::Status { .. } => "STATUS",
            Response::Handle(_) => "HANDLE",
            Response::Data(_) => "DATA",
            Response::Name(_) => "NAME",
            Response::Attrs(_) => "ATTRS",
        }
    }

    fn unexpected(self, request: MessageType) -> Error {
        match self {
            Response::Status { code, message } => Error::status(code, message),
            other => Error::Protocol(format!(
                "Unexpected {} reply to {:?}",
                other.describe(),
                request
            )),
        }
    }

    fn into_ok(self, request: MessageType) -> Result<()> {
        match self {
            Response::Status {
                code: StatusCode::Ok,
                ..
            } => Ok(()),
            other => Err(other.unexpected(request)),
        }
    }

    fn into_handle(self, request: MessageType) -> Result<Vec<u8>> {
        match self {
            Response::Handle(handle) => Ok(handle),
            other => Err(other.unexpected(request)),
        }
    }
}

/// SFTP v3 client session
pub struct SftpSession<S> {
    stream: S,
    next_id: u32,
    version: u32,
    timeout: Option<Duration>,
}

impl<S> SftpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send `SSH_FXP_INIT` and wait for the server's version
    pub async fn init(mut stream: S, timeout: Option<Duration>) -> Result<Self> {
        let mut packet = BytesMut::with_capacity(5);
        packet.put_u8(MessageType::Init as u8);
        packet.put_u32(SFTP_VERSION);

        let (kind, body) = with_timeout(timeout, "negotiating SFTP version", async {
            write_packet(&mut stream, &packet).await?;
            read_packet(&mut stream).await
        })
        .await?;

        if kind != MessageType::Version as u8 {
            return Err(Error::Protocol(format!(
                "Expected VERSION, got message type {}",
                kind
            )));
        }
        let mut buf = &body[..];
        let server_version = codec::get_u32(&mut buf, "version")?;
        if server_version < SFTP_VERSION {
            return Err(Error::Protocol(format!(
                "Server speaks SFTP version {}, need {}",
                server_version, SFTP_VERSION
            )));
        }

        while buf.has_remaining() {
            let name = codec::get_bytes(&mut buf)?;
            codec::get_bytes(&mut buf)?;
            trace!("Server extension {}", String::from_utf8_lossy(&name));
        }
        debug!("SFTP session established (server version {})", server_version);

        Ok(Self {
            stream,
            next_id: 0,
            version: SFTP_VERSION,
            timeout,
        })
    }

    /// Bound every later request by `timeout`
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Negotiated protocol version
    pub fn version(&self) -> u32 {
        self.version
    }

    async fn request(&mut self, kind: MessageType, payload: &[u8]) -> Result<Response> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut packet = BytesMut::with_capacity(payload.len() + 5);
        packet.put_u8(kind as u8);
        packet.put_u32(id);
        packet.put_slice(payload);

        let limit = self.timeout;
        let stream = &mut self.stream;
        let (reply, body) = with_timeout(limit, &format!("waiting for {:?} reply", kind), async move {
            write_packet(stream, &packet).await?;
            read_packet(stream).await
        })
        .await?;

        parse_response(id, reply, &body)
    }

    async fn path_request(&mut self, kind: MessageType, path: &str) -> Result<Response> {
        trace!("{:?} {}", kind, path);
        let mut payload = BytesMut::new();
        codec::put_string(&mut payload, path);
        self.request(kind, &payload).await
    }

    async fn handle_request(&mut self, kind: MessageType, handle: &[u8]) -> Result<Response> {
        let mut payload = BytesMut::new();
        codec::put_bytes(&mut payload, handle);
        self.request(kind, &payload).await
    }

    /// Attributes of `path`, following symlinks; `None` when it does not exist
    pub async fn stat(&mut self, path: &str) -> Result<Option<FileAttrs>> {
        self.attrs_request(MessageType::Stat, path).await
    }

    async fn attrs_request(&mut self, kind: MessageType, path: &str) -> Result<Option<FileAttrs>> {
        match self.path_request(kind, path).await? {
            Response::Attrs(attrs) => Ok(Some(attrs)),
            Response::Status {
                code: StatusCode::NoSuchFile,
                ..
            } => Ok(None),
            other => Err(other.unexpected(kind)),
        }
    }

    /// Open a file and return its handle
    pub async fn open(&mut self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> Result<Vec<u8>> {
        trace!("OPEN {} (flags {:#x})", path, flags.0);
        let mut payload = BytesMut::new();
        codec::put_string(&mut payload, path);
        payload.put_u32(flags.0);
        attrs.encode(&mut payload);
        self.request(MessageType::Open, &payload)
            .await?
            .into_handle(MessageType::Open)
    }

    /// Release a file or directory handle
    pub async fn close(&mut self, handle: &[u8]) -> Result<()> {
        self.handle_request(MessageType::Close, handle)
            .await?
            .into_ok(MessageType::Close)
    }

    /// Read up to `len` bytes at `offset`; `None` at end of file
    pub async fn read(&mut self, handle: &[u8], offset: u64, len: u32) -> Result<Option<Vec<u8>>> {
        let mut payload = BytesMut::new();
        codec::put_bytes(&mut payload, handle);
        payload.put_u64(offset);
        payload.put_u32(len);

        match self.request(MessageType::Read, &payload).await? {
            Response::Data(data) => Ok(Some(data)),
            Response::Status {
                code: StatusCode::Eof,
                ..
            } => Ok(None),
            other => Err(other.unexpected(MessageType::Read)),
        }
    }

    /// Write `data` at `offset`
    pub async fn write(&mut self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        let mut payload = BytesMut::with_capacity(handle.len() + data.len() + 16);
        codec::put_bytes(&mut payload, handle);
        payload.put_u64(offset);
        codec::put_bytes(&mut payload, data);
        self.request(MessageType::Write, &payload)
            .await?
            .into_ok(MessageType::Write)
    }

    /// Open a directory for listing
    pub async fn opendir(&mut self, path: &str) -> Result<Vec<u8>> {
        self.path_request(MessageType::Opendir, path)
            .await?
            .into_handle(MessageType::Opendir)
    }

    /// Next batch of directory entries; `None` once the listing is exhausted
    pub async fn readdir(&mut self, handle: &[u8]) -> Result<Option<Vec<NameEntry>>> {
        match self.handle_request(MessageType::Readdir, handle).await? {
            Response::Name(names) => Ok(Some(names)),
            Response::Status {
                code: StatusCode::Eof,
                ..
            } => Ok(None),
            other => Err(other.unexpected(MessageType::Readdir)),
        }
    }

    /// Delete a file
    pub async fn remove(&mut self, path: &str) -> Result<()> {
        self.path_request(MessageType::Remove, path)
            .await?
            .into_ok(MessageType::Remove)
    }

    /// Create a directory with mode 0755
    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        trace!("MKDIR {}", path);
        let mut payload = BytesMut::new();
        codec::put_string(&mut payload, path);
        FileAttrs::directory_mode(0o755).encode(&mut payload);
        self.request(MessageType::Mkdir, &payload)
            .await?
            .into_ok(MessageType::Mkdir)
    }

    /// Remove an empty directory
    pub async fn rmdir(&mut self, path: &str) -> Result<()> {
        self.path_request(MessageType::Rmdir, path)
            .await?
            .into_ok(MessageType::Rmdir)
    }

    /// Whether `path` exists
    pub async fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// Full listing of a directory, without `.` and `..`
    pub async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let handle = self.opendir(path).await?;

        let mut names = Vec::new();
        let listed = loop {
            match self.readdir(&handle).await {
                Ok(Some(batch)) => names.extend(batch),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close(&handle).await;
        listed?;
        closed?;

        Ok(names
            .into_iter()
            .filter(|n| n.filename != "." && n.filename != "..")
            .map(|n| {
                let kind = n.kind();
                RemoteEntry {
                    size: if kind == EntryKind::File { n.attrs.size } else { None },
                    name: n.filename,
                    kind,
                }
            })
            .collect())
    }

    /// Write everything `reader` yields into `remote`, replacing any existing file
    pub async fn upload<R>(
        &mut self,
        reader: &mut R,
        remote: &str,
        total: Option<u64>,
        progress: &dyn ProgressSink,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let handle = self
            .open(remote, OpenFlags::create_truncate(), &FileAttrs::default())
            .await?;

        let written = self.write_from(&handle, reader, remote, total, progress).await;
        let closed = self.close(&handle).await;
        let bytes = written?;
        closed?;
        Ok(bytes)
    }

    async fn write_from<R>(
        &mut self,
        handle: &[u8],
        reader: &mut R,
        remote: &str,
        total: Option<u64>,
        progress: &dyn ProgressSink,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut transfer = FileTransfer::start(progress, remote, TransferKind::Upload, total);
        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let mut offset = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(Error::Local)?;
            if n == 0 {
                break;
            }
            self.write(handle, offset, &buf[..n]).await?;
            offset += n as u64;
            transfer.advance(n);
        }
        Ok(transfer.finish())
    }

    /// Read `remote` into `writer`
    pub async fn download<W>(
        &mut self,
        remote: &str,
        writer: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let handle = self
            .open(remote, OpenFlags::read_only(), &FileAttrs::default())
            .await?;

        let read = self.read_into(&handle, writer, remote, progress).await;
        let closed = self.close(&handle).await;
        let bytes = read?;
        closed?;
        Ok(bytes)
    }

    async fn read_into<W>(
        &mut self,
        handle: &[u8],
        writer: &mut W,
        remote: &str,
        progress: &dyn ProgressSink,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let total = match self.handle_request(MessageType::Fstat, handle).await? {
            Response::Attrs(attrs) => attrs.size,
            other => {
                debug!("FSTAT on {} failed: {}", remote, other.unexpected(MessageType::Fstat));
                None
            }
        };

        let mut transfer = FileTransfer::start(progress, remote, TransferKind::Download, total);
        let mut offset = 0u64;
        while let Some(data) = self.read(handle, offset, CHUNK_SIZE).await? {
            if data.is_empty() {
                return Err(Error::Protocol(format!("Empty DATA reply at offset {}", offset)));
            }
            writer.write_all(&data).await.map_err(Error::Local)?;
            offset += data.len() as u64;
            transfer.advance(data.len());
        }
        writer.flush().await.map_err(Error::Local)?;
        Ok(transfer.finish())
    }

    /// Close the underlying stream
    pub async fn shutdown(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl<S> std::fmt::Debug for SftpSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("version", &self.version)
            .field("next_id", &self.next_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn write_packet<S: AsyncWrite + Unpin>(stream: &mut S, body: &[u8]) -> Result<()> {
    let mut frame = BytesMut::with_capacity(body.len() + 4);
    frame.put_u32(body.len() as u32);
    frame.put_slice(body);
    stream.write_all(&frame).await.map_err(closed)?;
    stream.flush().await.map_err(closed)?;
    Ok(())
}

/// Read one packet, returning its type byte and the bytes after it
async fn read_packet<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(u8, Vec<u8>)> {
    let len = stream.read_u32().await.map_err(closed)?;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(Error::Protocol(format!("Invalid packet length {}", len)));
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.map_err(closed)?;
    let kind = body.remove(0);
    Ok((kind, body))
}

fn closed(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => Error::ChannelClosed,
        _ => Error::Io(err),
    }
}

fn parse_response(expected_id: u32, kind: u8, body: &[u8]) -> Result<Response> {
    let kind = MessageType::try_from(kind)?;
    let mut buf = body;
    let id = codec::get_u32(&mut buf, "request id")?;
    if id != expected_id {
        return Err(Error::Protocol(format!(
            "Reply for request {} while waiting for {}",
            id, expected_id
        )));
    }

    match kind {
        MessageType::Status => {
            let code = StatusCode::from_wire(codec::get_u32(&mut buf, "status code")?);
            // Some v3 servers omit the message and language tag
            let message = if buf.has_remaining() {
                lossy(codec::get_bytes(&mut buf)?)
            } else {
                String::new()
            };
            Ok(Response::Status { code, message })
        }
        MessageType::Handle => Ok(Response::Handle(codec::get_bytes(&mut buf)?)),
        MessageType::Data => Ok(Response::Data(codec::get_bytes(&mut buf)?)),
        MessageType::Attrs => Ok(Response::Attrs(FileAttrs::decode(&mut buf)?)),
        MessageType::Name => {
            let count = codec::get_u32(&mut buf, "name count")?;
            let mut names = Vec::new();
            for _ in 0..count {
                names.push(NameEntry {
                    filename: lossy(codec::get_bytes(&mut buf)?),
                    longname: lossy(codec::get_bytes(&mut buf)?),
                    attrs: FileAttrs::decode(&mut buf)?,
                });
            }
            Ok(Response::Name(names))
        }
        other => Err(Error::Protocol(format!("Unexpected {:?} message from server", other))),
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
