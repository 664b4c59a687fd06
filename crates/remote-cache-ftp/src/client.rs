//! FTP client session
//!
//! `suppaftp` drives the protocol over blocking sockets, so each session is
//! owned by its own thread. Calls are queued to that thread as jobs and their
//! results come back over oneshot channels; a transfer also reports the bytes
//! it moves while it runs. The control socket carries the configured timeout.

use crate::{FtpError, Result, tls};
use remote_cache_core::progress::{FileTransfer, TransferKind};
use remote_cache_core::{ConnectParams, EntryKind, ProgressSink, Protocol, RemoteEntry};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::str::FromStr;
use suppaftp::list::File as ListedFile;
use suppaftp::types::FileType;
use suppaftp::{Mode, RustlsFtpStream};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Data connection buffer size
const CHUNK_SIZE: usize = 64 * 1024;

/// Work queued to the session thread
type Job = Box<dyn FnOnce(&mut Session) + Send>;

/// Authenticated FTP session
pub struct FtpClient {
    jobs: UnboundedSender<Job>,
    host: String,
}

impl FtpClient {
    /// Connect, optionally upgrade to TLS, and log in
    pub async fn connect(params: &ConnectParams) -> Result<Self> {
        let port = params.port_for(Protocol::Ftp);
        let addr = resolve(params, port).await?;

        let owned = params.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (jobs, mut queue) = unbounded_channel::<Job>();

        std::thread::Builder::new()
            .name("ftp-session".into())
            .spawn(move || {
                let mut session = match Session::open(&owned, addr) {
                    Ok(session) => {
                        let _ = ready_tx.send(Ok(session.home.clone()));
                        session
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Runs until the client is dropped
                while let Some(job) = queue.blocking_recv() {
                    job(&mut session);
                }
            })?;

        let home = ready_rx
            .await
            .map_err(|_| FtpError::ConnectionClosed("session thread stopped during login".into()))??;

        info!(
            "Logged in to {}:{} as {} (secure: {}, home: {})",
            params.host, port, params.user, params.secure, home
        );

        Ok(Self {
            jobs,
            host: params.host.clone(),
        })
    }

    /// Whether `path` names an existing directory or file
    pub async fn exists(&mut self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.call(move |session| session.exists(&path)).await
    }

    /// Create one directory
    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.call(move |session| session.mkdir(&path)).await
    }

    /// Delete one file
    pub async fn remove_file(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.call(move |session| session.remove_file(&path)).await
    }

    /// Remove an empty directory
    pub async fn remove_dir(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.call(move |session| session.remove_dir(&path)).await
    }

    /// List `path`, preferring `MLSD`
    pub async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = path.to_string();
        self.call(move |session| session.list(&path)).await
    }

    /// Upload `file` into `remote`, returning the bytes sent
    pub async fn put(
        &mut self,
        file: std::fs::File,
        remote: &str,
        total: Option<u64>,
        progress: &dyn ProgressSink,
    ) -> Result<u64> {
        let mut transfer = FileTransfer::start(progress, remote, TransferKind::Upload, total);
        let target = remote.to_string();

        self.transfer(&mut transfer, move |session, sent| {
            let mut reader = CountingReader {
                inner: file,
                sent,
                failed: None,
            };
            let result = session.put(&mut reader, &target);
            match reader.failed {
                Some(e) => Err(FtpError::Local(e)),
                None => result,
            }
        })
        .await?;

        Ok(transfer.finish())
    }

    /// Download `remote` into `file`, returning the bytes received
    pub async fn get(
        &mut self,
        remote: &str,
        mut file: std::fs::File,
        progress: &dyn ProgressSink,
    ) -> Result<u64> {
        let path = remote.to_string();
        let total = self.call(move |session| session.size(&path)).await?;

        let mut transfer = FileTransfer::start(progress, remote, TransferKind::Download, total);
        let source = remote.to_string();

        self.transfer(&mut transfer, move |session, received| {
            session.get(&source, &mut file, received)?;
            file.sync_all().map_err(FtpError::Local)
        })
        .await?;

        Ok(transfer.finish())
    }

    /// End the session with `QUIT`; the session thread exits afterwards
    pub async fn quit(mut self) -> Result<()> {
        self.call(Session::quit).await
    }

    /// Run `op` on the session thread
    async fn call<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |session| {
                let _ = tx.send(op(session));
            }))
            .map_err(|_| self.lost())?;

        rx.await.map_err(|_| self.lost())?
    }

    /// Like [`FtpClient::call`], feeding byte counts from `op` into `transfer`
    async fn transfer<F>(&mut self, transfer: &mut FileTransfer<'_>, op: F) -> Result<()>
    where
        F: FnOnce(&mut Session, UnboundedSender<usize>) -> Result<()> + Send + 'static,
    {
        let (bytes_tx, mut bytes_rx) = unbounded_channel();
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |session| {
                let _ = tx.send(op(session, bytes_tx));
            }))
            .map_err(|_| self.lost())?;

        // Closes once the job has dropped its sender
        while let Some(bytes) = bytes_rx.recv().await {
            transfer.advance(bytes);
        }

        rx.await.map_err(|_| self.lost())?
    }

    fn lost(&self) -> FtpError {
        FtpError::ConnectionClosed(format!("session to {} was lost", self.host))
    }
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient")
            .field("host", &self.host)
            .field("connected", &!self.jobs.is_closed())
            .finish()
    }
}

async fn resolve(params: &ConnectParams, port: u16) -> Result<SocketAddr> {
    let lookup = tokio::net::lookup_host((params.host.as_str(), port));
    let mut addrs = match params.deadline() {
        Some(limit) => tokio::time::timeout(limit, lookup)
            .await
            .map_err(|_| FtpError::Timeout(format!("resolving {}", params.host)))??,
        None => lookup.await?,
    };

    addrs.next().ok_or_else(|| {
        FtpError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}", params.host),
        ))
    })
}

/// Blocking session state, owned by the session thread
struct Session {
    ftp: RustlsFtpStream,
    /// Working directory after login, restored after `exists` changes into a directory
    home: String,
    /// Cleared once the server refuses `EPSV`
    epsv: bool,
    /// Cleared once the server refuses `MLSD`
    mlsd: bool,
}

impl Session {
    fn open(params: &ConnectParams, addr: SocketAddr) -> Result<Self> {
        let timeout = params.deadline();
        let ftp = match timeout {
            Some(limit) => RustlsFtpStream::connect_timeout(addr, limit),
            None => RustlsFtpStream::connect(addr),
        }
        .map_err(|e| FtpError::from_ftp("connect", e))?;
        debug!("Control connection to {} established", addr);

        ftp.get_ref().set_read_timeout(timeout)?;
        ftp.get_ref().set_write_timeout(timeout)?;

        let mut ftp = if params.secure {
            let connector = tls::connector(params.verify_tls)?;
            let secured = ftp
                .into_secure(connector, &params.host)
                .map_err(|e| FtpError::from_ftp("AUTH TLS", e))?;
            debug!("Control connection upgraded to TLS, data protection set to private");
            secured
        } else {
            ftp
        };

        debug!("USER {}", params.user);
        ftp.login(params.user.as_str(), params.password.as_str())
            .map_err(|e| match FtpError::from_ftp("login", e) {
                FtpError::Reply { code, message, .. } => {
                    FtpError::Authentication(format!("{} {}", code, message))
                }
                other => other,
            })?;

        ftp.transfer_type(FileType::Binary)
            .map_err(|e| FtpError::from_ftp("TYPE I", e))?;
        ftp.set_mode(Mode::ExtendedPassive);
        // Servers behind NAT often advertise an unroutable PASV address
        ftp.set_passive_nat_workaround(true);

        let home = ftp.pwd().map_err(|e| FtpError::from_ftp("PWD", e))?;

        Ok(Self {
            ftp,
            home,
            epsv: true,
            mlsd: true,
        })
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        debug!("CWD {}", path);
        match self.ftp.cwd(path).map_err(|e| FtpError::from_ftp("CWD", e)) {
            Ok(()) => {
                self.ftp
                    .cwd(self.home.as_str())
                    .map_err(|e| FtpError::from_ftp("CWD", e))?;
                return Ok(true);
            }
            Err(FtpError::Reply { .. }) => {}
            Err(e) => return Err(e),
        }

        Ok(self.size(path)?.is_some())
    }

    /// Size of a regular file, `None` when the server knows no such file
    fn size(&mut self, path: &str) -> Result<Option<u64>> {
        debug!("SIZE {}", path);
        match self.ftp.size(path).map_err(|e| FtpError::from_ftp("SIZE", e)) {
            Ok(size) => Ok(Some(size as u64)),
            Err(FtpError::Reply { code: 550, .. }) => Ok(None),
            Err(e) if e.is_unsupported() => {
                debug!("SIZE not supported: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        debug!("MKD {}", path);
        self.ftp
            .mkdir(path)
            .map_err(|e| FtpError::from_ftp(format!("MKD {}", path), e))
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        debug!("DELE {}", path);
        self.ftp
            .rm(path)
            .map_err(|e| FtpError::from_ftp(format!("DELE {}", path), e))
    }

    fn remove_dir(&mut self, path: &str) -> Result<()> {
        debug!("RMD {}", path);
        self.ftp
            .rmdir(path)
            .map_err(|e| FtpError::from_ftp(format!("RMD {}", path), e))
    }

    fn put(&mut self, mut reader: &mut dyn Read, remote: &str) -> Result<()> {
        let command = format!("STOR {}", remote);
        debug!("{}", command);
        self.passive(&command, |ftp| ftp.put_file(remote, &mut reader))?;
        Ok(())
    }

    fn get(&mut self, remote: &str, writer: &mut dyn Write, received: UnboundedSender<usize>) -> Result<()> {
        let command = format!("RETR {}", remote);
        debug!("{}", command);
        let mut stream = self.passive(&command, |ftp| ftp.retr_as_stream(remote))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FtpError::Io(e)),
            };
            writer.write_all(&buf[..n]).map_err(FtpError::Local)?;
            let _ = received.send(n);
        }
        writer.flush().map_err(FtpError::Local)?;

        self.ftp
            .finalize_retr_stream(stream)
            .map_err(|e| FtpError::from_ftp(command, e))
    }

    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        if self.mlsd {
            let command = format!("MLSD {}", path);
            debug!("{}", command);
            match self.passive(&command, |ftp| ftp.mlsd(Some(path))) {
                Ok(lines) => return Ok(parse_mlsd(&lines)),
                Err(e) if e.is_unsupported() => {
                    debug!("MLSD not supported ({}), falling back to LIST", e);
                    self.mlsd = false;
                }
                Err(e) => return Err(e),
            }
        }

        let command = format!("LIST {}", path);
        debug!("{}", command);
        let lines = self.passive(&command, |ftp| ftp.list(Some(path)))?;
        Ok(parse_list(&lines))
    }

    fn quit(&mut self) -> Result<()> {
        debug!("QUIT");
        self.ftp.quit().map_err(|e| FtpError::from_ftp("QUIT", e))
    }

    /// Run a data command, falling back from `EPSV` to `PASV`.
    ///
    /// A refusal is retried once over `PASV`. When the retry is refused too,
    /// the command itself is unsupported and `EPSV` stays in use.
    fn passive<T>(
        &mut self,
        command: &str,
        mut op: impl FnMut(&mut RustlsFtpStream) -> suppaftp::FtpResult<T>,
    ) -> Result<T> {
        let first = op(&mut self.ftp).map_err(|e| FtpError::from_ftp(command, e));
        match first {
            Err(e) if self.epsv && e.is_unsupported() => {
                self.ftp.set_mode(Mode::Passive);
                let retried = op(&mut self.ftp).map_err(|e| FtpError::from_ftp(command, e));
                match &retried {
                    Err(again) if again.is_unsupported() => {
                        self.ftp.set_mode(Mode::ExtendedPassive);
                    }
                    _ => {
                        debug!("EPSV refused ({}), using PASV for this session", e);
                        self.epsv = false;
                    }
                }
                retried
            }
            other => other,
        }
    }
}

/// Parse `MLSD` lines, skipping the `cdir`/`pdir` entries
fn parse_mlsd(lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| {
            let facts = line.split_once(' ').map_or("", |(facts, _)| facts);
            let facts = facts.to_ascii_lowercase();
            !facts.contains("type=cdir") && !facts.contains("type=pdir")
        })
        .filter_map(|line| match ListedFile::from_mlsx_line(line) {
            Ok(file) => Some(file),
            Err(_) => {
                debug!("Skipping unparsable MLSD line: {}", line);
                None
            }
        })
        .filter_map(|file| to_entry(&file))
        .collect()
}

/// Parse Unix or DOS style `LIST` lines
fn parse_list(lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty() && !line.starts_with("total "))
        .filter_map(|line| match ListedFile::from_str(line) {
            Ok(file) => Some(file),
            Err(_) => {
                debug!("Skipping unparsable LIST line: {}", line);
                None
            }
        })
        .filter_map(|file| to_entry(&file))
        .collect()
}

fn to_entry(file: &ListedFile) -> Option<RemoteEntry> {
    let name = file.name();
    if name == "." || name == ".." {
        return None;
    }

    let kind = if file.is_directory() {
        EntryKind::Dir
    } else if file.is_symlink() {
        EntryKind::Symlink
    } else if file.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    Some(RemoteEntry {
        name: name.to_string(),
        kind,
        size: (kind == EntryKind::File).then(|| file.size() as u64),
    })
}

/// Reader that reports every chunk it hands out and keeps its own errors
/// apart from socket errors
struct CountingReader<R> {
    inner: R,
    sent: UnboundedSender<usize>,
    failed: Option<io::Error>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                if n > 0 {
                    let _ = self.sent.send(n);
                }
                Ok(n)
            }
            Err(e) => {
                self.failed = Some(io::Error::new(e.kind(), e.to_string()));
                Err(e)
            }
        }
    }
}
