//! Minimal SFTP v3 server backed by an in-memory tree, served over
//! `tokio::io::duplex` instead of SSH

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use remote_cache_core::{ConnectParams, Connection, Connector, Protocol};
use remote_cache_sftp::protocol::{FileAttrs, codec};
use remote_cache_sftp::{SftpClient, SftpConnection, SftpSession};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

const FXP_VERSION: u8 = 2;
const FXP_STATUS: u8 = 101;
const FXP_HANDLE: u8 = 102;
const FXP_DATA: u8 = 103;
const FXP_NAME: u8 = 104;
const FXP_ATTRS: u8 = 105;

const FX_OK: u32 = 0;
const FX_EOF: u32 = 1;
const FX_NO_SUCH_FILE: u32 = 2;
const FX_PERMISSION_DENIED: u32 = 3;
const FX_FAILURE: u32 = 4;
const FX_OP_UNSUPPORTED: u32 = 8;

pub struct ServerState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    /// Every request as "NAME path", in order
    pub requests: Vec<String>,
    /// Paths the server refuses to open for writing
    pub read_only: BTreeSet<String>,
    /// Largest DATA payload per READ
    pub max_read: usize,
    /// Leave permission bits out of READDIR attributes
    pub bare_listing: bool,
    pub sessions: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            requests: Vec::new(),
            read_only: BTreeSet::new(),
            max_read: 1000,
            bare_listing: false,
            sessions: 0,
        }
    }
}

impl ServerState {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some(("", _)) => true,
            Some((parent, _)) => self.is_dir(parent),
            None => false,
        }
    }

    fn attrs(&self, path: &str) -> Option<FileAttrs> {
        if self.is_dir(path) {
            Some(FileAttrs {
                permissions: Some(0o040755),
                ..FileAttrs::default()
            })
        } else {
            self.files.get(path).map(|body| FileAttrs {
                size: Some(body.len() as u64),
                permissions: Some(0o100644),
                ..FileAttrs::default()
            })
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.dirs
            .iter()
            .chain(self.files.keys())
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(str::to_string)
            })
            .collect()
    }
}

pub type SharedState = Arc<Mutex<ServerState>>;

enum OpenHandle {
    File { path: String },
    Dir { batches: Vec<Vec<u8>> },
}

/// Serve one SFTP session until the client closes the stream
pub async fn serve<S>(mut stream: S, state: SharedState) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handles: HashMap<Vec<u8>, OpenHandle> = HashMap::new();
    let mut next_handle = 0u32;

    loop {
        let Ok(len) = stream.read_u32().await else {
            return Ok(());
        };
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;

        let kind = body[0];
        let mut buf = &body[1..];

        let reply = if kind == 1 {
            state.lock().unwrap().sessions += 1;
            let mut out = BytesMut::new();
            out.put_u8(FXP_VERSION);
            out.put_u32(3);
            codec::put_string(&mut out, "posix-rename@openssh.com");
            codec::put_string(&mut out, "1");
            out
        } else {
            let id = buf.get_u32();
            let mut state = state.lock().unwrap();
            handle(kind, id, &mut buf, &mut state, &mut handles, &mut next_handle)
        };

        let mut frame = BytesMut::new();
        frame.put_u32(reply.len() as u32);
        frame.put_slice(&reply);
        stream.write_all(&frame).await?;
    }
}

fn status(id: u32, code: u32, message: &str) -> BytesMut {
    let mut out = BytesMut::new();
    out.put_u8(FXP_STATUS);
    out.put_u32(id);
    out.put_u32(code);
    codec::put_string(&mut out, message);
    codec::put_string(&mut out, "en");
    out
}

fn handle_reply(id: u32, handle: &[u8]) -> BytesMut {
    let mut out = BytesMut::new();
    out.put_u8(FXP_HANDLE);
    out.put_u32(id);
    codec::put_bytes(&mut out, handle);
    out
}

fn listing_batches(state: &ServerState, path: &str) -> Vec<Vec<u8>> {
    let mut entries = vec![(".".to_string(), state.attrs(path))];
    entries.push(("..".to_string(), Some(FileAttrs::directory_mode(0o040755))));
    for name in state.children(path) {
        let full = if path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", path, name)
        };
        entries.push((name, state.attrs(&full)));
    }

    // Two names per READDIR reply
    entries
        .chunks(2)
        .map(|chunk| {
            let mut out = BytesMut::new();
            out.put_u32(chunk.len() as u32);
            for (name, attrs) in chunk {
                let attrs = attrs.clone().unwrap_or_default();
                let longname = format!(
                    "{} 1 ci ci {} Jan 1 12:00 {}",
                    if attrs.is_dir() { "drwxr-xr-x" } else { "-rw-r--r--" },
                    attrs.size.unwrap_or(4096),
                    name
                );
                codec::put_string(&mut out, name);
                codec::put_string(&mut out, &longname);
                if state.bare_listing {
                    FileAttrs {
                        size: attrs.size,
                        ..FileAttrs::default()
                    }
                    .encode(&mut out);
                } else {
                    attrs.encode(&mut out);
                }
            }
            out.to_vec()
        })
        .collect()
}

fn handle(
    kind: u8,
    id: u32,
    buf: &mut &[u8],
    state: &mut ServerState,
    handles: &mut HashMap<Vec<u8>, OpenHandle>,
    next_handle: &mut u32,
) -> BytesMut {
    let mut new_handle = |handles: &mut HashMap<Vec<u8>, OpenHandle>, open: OpenHandle| {
        let handle = format!("h{}", next_handle).into_bytes();
        *next_handle += 1;
        handles.insert(handle.clone(), open);
        handle
    };

    match kind {
        // OPEN
        3 => {
            let path = codec::get_string(buf).unwrap();
            let flags = buf.get_u32();
            FileAttrs::decode(buf).unwrap();
            state.requests.push(format!("OPEN {}", path));

            let writing = flags & 0x2 != 0;
            if writing && state.read_only.contains(&path) {
                return status(id, FX_PERMISSION_DENIED, "Permission denied");
            }
            if writing {
                if !state.parent_exists(&path) {
                    return status(id, FX_NO_SUCH_FILE, "No such file");
                }
                state.files.insert(path.clone(), Vec::new());
            } else if !state.files.contains_key(&path) {
                return status(id, FX_NO_SUCH_FILE, "No such file");
            }
            let handle = new_handle(handles, OpenHandle::File { path });
            handle_reply(id, &handle)
        }
        // CLOSE
        4 => {
            let handle = codec::get_bytes(buf).unwrap();
            match handles.remove(&handle) {
                Some(_) => status(id, FX_OK, "Success"),
                None => status(id, FX_FAILURE, "Invalid handle"),
            }
        }
        // READ
        5 => {
            let handle = codec::get_bytes(buf).unwrap();
            let offset = buf.get_u64() as usize;
            let len = buf.get_u32() as usize;
            let Some(OpenHandle::File { path }) = handles.get(&handle) else {
                return status(id, FX_FAILURE, "Invalid handle");
            };
            let body = &state.files[path];
            if offset >= body.len() {
                return status(id, FX_EOF, "End of file");
            }
            let end = body.len().min(offset + len.min(state.max_read));
            let mut out = BytesMut::new();
            out.put_u8(FXP_DATA);
            out.put_u32(id);
            codec::put_bytes(&mut out, &body[offset..end]);
            out
        }
        // WRITE
        6 => {
            let handle = codec::get_bytes(buf).unwrap();
            let offset = buf.get_u64() as usize;
            let data = codec::get_bytes(buf).unwrap();
            let Some(OpenHandle::File { path }) = handles.get(&handle) else {
                return status(id, FX_FAILURE, "Invalid handle");
            };
            let body = state.files.get_mut(path).unwrap();
            if body.len() < offset + data.len() {
                body.resize(offset + data.len(), 0);
            }
            body[offset..offset + data.len()].copy_from_slice(&data);
            status(id, FX_OK, "Success")
        }
        // LSTAT, STAT
        7 | 17 => {
            let path = codec::get_string(buf).unwrap();
            state.requests.push(format!("STAT {}", path));
            match state.attrs(&path) {
                Some(attrs) => {
                    let mut out = BytesMut::new();
                    out.put_u8(FXP_ATTRS);
                    out.put_u32(id);
                    attrs.encode(&mut out);
                    out
                }
                None => status(id, FX_NO_SUCH_FILE, "No such file"),
            }
        }
        // FSTAT
        8 => {
            let handle = codec::get_bytes(buf).unwrap();
            match handles.get(&handle) {
                Some(OpenHandle::File { path }) => {
                    let mut out = BytesMut::new();
                    out.put_u8(FXP_ATTRS);
                    out.put_u32(id);
                    state.attrs(path).unwrap_or_default().encode(&mut out);
                    out
                }
                _ => status(id, FX_FAILURE, "Invalid handle"),
            }
        }
        // OPENDIR
        11 => {
            let path = codec::get_string(buf).unwrap();
            state.requests.push(format!("OPENDIR {}", path));
            if !state.is_dir(&path) {
                return status(id, FX_NO_SUCH_FILE, "No such file");
            }
            let mut batches = listing_batches(state, &path);
            batches.reverse();
            let handle = new_handle(handles, OpenHandle::Dir { batches });
            handle_reply(id, &handle)
        }
        // READDIR
        12 => {
            let handle = codec::get_bytes(buf).unwrap();
            match handles.get_mut(&handle) {
                Some(OpenHandle::Dir { batches }) => match batches.pop() {
                    Some(batch) => {
                        let mut out = BytesMut::new();
                        out.put_u8(FXP_NAME);
                        out.put_u32(id);
                        out.put_slice(&batch);
                        out
                    }
                    None => status(id, FX_EOF, "End of file"),
                },
                _ => status(id, FX_FAILURE, "Invalid handle"),
            }
        }
        // REMOVE
        13 => {
            let path = codec::get_string(buf).unwrap();
            state.requests.push(format!("REMOVE {}", path));
            match state.files.remove(&path) {
                Some(_) => status(id, FX_OK, "Success"),
                None => status(id, FX_NO_SUCH_FILE, "No such file"),
            }
        }
        // MKDIR
        14 => {
            let path = codec::get_string(buf).unwrap();
            FileAttrs::decode(buf).unwrap();
            state.requests.push(format!("MKDIR {}", path));
            if state.is_dir(&path) || state.files.contains_key(&path) {
                status(id, FX_FAILURE, "Failure")
            } else if !state.parent_exists(&path) {
                status(id, FX_NO_SUCH_FILE, "No such file")
            } else {
                state.dirs.insert(path);
                status(id, FX_OK, "Success")
            }
        }
        // RMDIR
        15 => {
            let path = codec::get_string(buf).unwrap();
            state.requests.push(format!("RMDIR {}", path));
            if !state.children(&path).is_empty() {
                status(id, FX_FAILURE, "Failure")
            } else if state.dirs.remove(&path) {
                status(id, FX_OK, "Success")
            } else {
                status(id, FX_NO_SUCH_FILE, "No such file")
            }
        }
        _ => status(id, FX_OP_UNSUPPORTED, "Operation unsupported"),
    }
}

/// Session over a fresh in-process server
pub async fn session(state: &SharedState) -> SftpSession<DuplexStream> {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let shared = Arc::clone(state);
    tokio::spawn(async move {
        let _ = serve(server, shared).await;
    });
    SftpSession::init(client, None).await.unwrap()
}

/// Connector handing out sessions on the in-process server
pub struct DuplexConnector {
    pub state: SharedState,
}

impl DuplexConnector {
    pub fn new(state: ServerState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(&self, params: &ConnectParams) -> remote_cache_core::Result<Box<dyn Connection>> {
        let session = session(&self.state).await.with_request_timeout(params.deadline());
        Ok(Box::new(SftpConnection::new(SftpClient::from_session(session))))
    }
}
