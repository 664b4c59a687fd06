//! Minimal in-process FTP server backed by an in-memory tree
//!
//! With `tls` set it also speaks explicit FTPS, using the self-signed
//! certificate under `tests/fixtures`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const CERT_PEM: &[u8] = include_bytes!("../fixtures/cert.pem");
const KEY_PEM: &[u8] = include_bytes!("../fixtures/key.pem");

/// Plain TCP or TLS socket
trait Socket: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Socket for T {}

type Control = BufReader<Box<dyn Socket>>;

pub struct ServerState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    /// Every command line received, in order
    pub commands: Vec<String>,
    /// Data connection events: `150 <verb>` when the transfer is announced,
    /// `tls <verb>` once its TLS handshake completed
    pub events: Vec<String>,
    pub user: String,
    pub password: String,
    pub support_epsv: bool,
    pub support_mlsd: bool,
    /// Accept `AUTH TLS`
    pub tls: bool,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            commands: Vec::new(),
            events: Vec::new(),
            user: "ci".into(),
            password: "secret".into(),
            support_epsv: true,
            support_mlsd: true,
            tls: false,
        }
    }
}

impl ServerState {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Vec<(String, Option<u64>)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        let direct = |key: &str| {
            key.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut out: Vec<(String, Option<u64>)> =
            self.dirs.iter().filter_map(|d| direct(d)).map(|n| (n, None)).collect();
        out.extend(
            self.files
                .iter()
                .filter_map(|(k, v)| direct(k).map(|n| (n, Some(v.len() as u64)))),
        );
        out
    }

    fn listing(&self, verb: &str, path: &str) -> Option<String> {
        if !self.is_dir(path) {
            return None;
        }

        let mut body = String::new();
        if verb == "MLSD" {
            body.push_str("type=cdir;modify=20240101000000; .\r\n");
        }
        for (name, size) in self.children(path) {
            let line = match (verb, size) {
                ("MLSD", Some(size)) => {
                    format!("type=file;size={};modify=20240101000000; {}", size, name)
                }
                ("MLSD", None) => format!("type=dir;modify=20240101000000; {}", name),
                (_, Some(size)) => {
                    format!("-rw-r--r--    1 ftp      ftp      {:>8} Jan 01 12:00 {}", size, name)
                }
                (_, None) => {
                    format!("drwxr-xr-x    2 ftp      ftp          4096 Jan 01 12:00 {}", name)
                }
            };
            body.push_str(&line);
            body.push_str("\r\n");
        }
        Some(body)
    }
}

pub struct FakeFtpServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<ServerState>>,
}

impl FakeFtpServer {
    pub async fn start(state: ServerState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tls = state.tls.then(acceptor);
        let state = Arc::new(Mutex::new(state));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                let tls = tls.clone();
                tokio::spawn(async move {
                    let _ = session(socket, state, tls).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }
}

fn acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut &CERT_PEM[..])
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .unwrap();
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &KEY_PEM[..])
        .unwrap()
        .unwrap();

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    // A ticket still in flight when the client closes an upload resets the socket
    config.send_tls13_tickets = 0;

    TlsAcceptor::from(Arc::new(config))
}

fn resolve(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), arg.trim_start_matches("./"))
    };
    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn reply(control: &mut Control, line: &str) -> io::Result<()> {
    let socket = control.get_mut();
    socket.write_all(format!("{}\r\n", line).as_bytes()).await?;
    socket.flush().await
}

async fn open_passive() -> io::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Announce a transfer with `150` and accept its data connection
async fn open_data(
    control: &mut Control,
    listener: &TcpListener,
    tls: Option<&TlsAcceptor>,
    state: &Mutex<ServerState>,
    verb: &str,
    text: &str,
) -> io::Result<Box<dyn Socket>> {
    state.lock().unwrap().events.push(format!("150 {}", verb));
    reply(control, &format!("150 {}", text)).await?;

    let (socket, _) = listener.accept().await?;
    match tls {
        Some(acceptor) => {
            let secured = acceptor.accept(socket).await?;
            state.lock().unwrap().events.push(format!("tls {}", verb));
            Ok(Box::new(secured))
        }
        None => Ok(Box::new(socket)),
    }
}

/// Read an upload until the client closes the data connection
async fn read_upload(data: &mut dyn Socket) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match data.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&buf[..n]),
            // TLS clients may close without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(body)
}

async fn send_data(mut data: Box<dyn Socket>, body: &[u8]) -> io::Result<()> {
    data.write_all(body).await?;
    data.shutdown().await
}

async fn session(
    socket: TcpStream,
    state: Arc<Mutex<ServerState>>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let mut control: Control = BufReader::new(Box::new(socket));
    let mut cwd = "/".to_string();
    // Kept after a refused command; clients may connect before reading the reply
    let mut passive: Option<TcpListener> = None;
    let mut protect = false;

    reply(&mut control, "220 fake ftp ready").await?;

    loop {
        let mut raw = String::new();
        if control.read_line(&mut raw).await? == 0 {
            break;
        }
        let line = raw.trim_end_matches(['\r', '\n']).to_string();
        state.lock().unwrap().commands.push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        let path = resolve(&cwd, &arg);
        let data_tls = if protect { tls.as_ref() } else { None };

        match verb.as_str() {
            "AUTH" => {
                let Some(acceptor) = tls.clone() else {
                    reply(&mut control, "502 AUTH not supported.").await?;
                    continue;
                };
                reply(&mut control, "234 Proceed with negotiation.").await?;
                let plain = control.into_inner();
                let secured = acceptor.accept(plain).await?;
                control = BufReader::new(Box::new(secured));
            }
            "PBSZ" => reply(&mut control, "200 PBSZ=0").await?,
            "PROT" => {
                protect = arg.eq_ignore_ascii_case("P");
                let text = if protect {
                    "200 PROT now Private."
                } else {
                    "200 PROT now Clear."
                };
                reply(&mut control, text).await?;
            }
            "EPSV" | "PASV" => {
                let supported = verb == "PASV" || state.lock().unwrap().support_epsv;
                if !supported {
                    reply(&mut control, "502 EPSV not implemented").await?;
                    continue;
                }
                let (listener, port) = open_passive().await?;
                passive = Some(listener);
                let text = if verb == "EPSV" {
                    format!("229 Entering Extended Passive Mode (|||{}|)", port)
                } else {
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port >> 8,
                        port & 0xff
                    )
                };
                reply(&mut control, &text).await?;
            }
            "STOR" => {
                let Some(listener) = passive.as_ref() else {
                    reply(&mut control, "425 Use PASV first").await?;
                    continue;
                };
                let mut data =
                    open_data(&mut control, listener, data_tls, &state, "STOR", "Ok to send data")
                        .await?;
                let body = read_upload(data.as_mut()).await?;
                drop(data);
                state.lock().unwrap().files.insert(path, body);
                reply(&mut control, "226 Transfer complete").await?;
            }
            "RETR" => {
                let body = state.lock().unwrap().files.get(&path).cloned();
                match (passive.as_ref(), body) {
                    (Some(listener), Some(body)) => {
                        let text = "Opening BINARY mode data connection";
                        let data =
                            open_data(&mut control, listener, data_tls, &state, "RETR", text)
                                .await?;
                        send_data(data, &body).await?;
                        reply(&mut control, "226 Transfer complete").await?;
                    }
                    (None, _) => reply(&mut control, "425 Use PASV first").await?,
                    (_, None) => reply(&mut control, "550 Failed to open file.").await?,
                }
            }
            "MLSD" | "LIST" => {
                let (supported, listing) = {
                    let state = state.lock().unwrap();
                    let supported = verb == "LIST" || state.support_mlsd;
                    (supported, state.listing(&verb, &path))
                };

                match (supported, passive.as_ref(), listing) {
                    (false, _, _) => reply(&mut control, "500 Unknown command.").await?,
                    (_, None, _) => reply(&mut control, "425 Use PASV first").await?,
                    (_, _, None) => reply(&mut control, "550 No such directory").await?,
                    (true, Some(listener), Some(body)) => {
                        let text = "Here comes the directory listing";
                        let data =
                            open_data(&mut control, listener, data_tls, &state, &verb, text)
                                .await?;
                        send_data(data, body.as_bytes()).await?;
                        reply(&mut control, "226 Directory send OK").await?;
                    }
                }
            }
            "QUIT" => {
                reply(&mut control, "221 Goodbye.").await?;
                break;
            }
            _ => {
                let text = command(&state, &mut cwd, &verb, &arg, &path);
                reply(&mut control, &text).await?;
            }
        }
    }

    Ok(())
}

/// Commands without a data connection
fn command(
    state: &Mutex<ServerState>,
    cwd: &mut String,
    verb: &str,
    arg: &str,
    path: &str,
) -> String {
    let mut state = state.lock().unwrap();
    match verb {
        "USER" if arg == state.user => "331 Please specify the password.".into(),
        "USER" => "530 Unknown user.".into(),
        "PASS" if arg == state.password => "230 Login successful.".into(),
        "PASS" => "530 Login incorrect.".into(),
        "TYPE" => "200 Switching to Binary mode.".into(),
        "PWD" => format!("257 \"{}\" is the current directory", cwd),
        "CWD" if state.is_dir(path) => {
            *cwd = path.to_string();
            "250 Directory successfully changed.".into()
        }
        "CWD" => "550 Failed to change directory.".into(),
        "SIZE" => match state.files.get(path) {
            Some(body) => format!("213 {}", body.len()),
            None => "550 Could not get file size.".into(),
        },
        "MKD" if state.is_dir(path) => "550 Create directory operation failed.".into(),
        "MKD" => {
            state.dirs.insert(path.to_string());
            format!("257 \"{}\" created", path)
        }
        "DELE" => match state.files.remove(path) {
            Some(_) => "250 Delete operation successful.".into(),
            None => "550 Delete operation failed.".into(),
        },
        "RMD" if !state.children(path).is_empty() => "550 Directory not empty.".into(),
        "RMD" if state.dirs.remove(path) => "250 Remove directory operation successful.".into(),
        "RMD" => "550 Remove directory operation failed.".into(),
        _ => "502 Command not implemented.".into(),
    }
}
