//! Listener/dispatcher and per-connection handler
//!
//! One OS thread per accepted connection plus one for the accept loop; all
//! socket and file I/O is blocking and local to its thread. Shared state is
//! limited to the file registry and the connected-clients registry, each
//! behind its own mutex held only around map access, never across I/O.
//!
//! A delete racing a download of the same composite key can make the
//! download fail with "File not found."; accepted weakness, no filesystem
//! locking beyond what the OS provides.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::framing::{recv_message, send_message, WireError};
use crate::logger::EventLog;
use crate::protocol::{
    composite_key, valid_filename, Command, Response, ERR_EMPTY_NAME, ERR_INVALID_NAME,
    ERR_NAME_IN_USE, HANDSHAKE_OK, MAX_HANDSHAKE_BYTES, MSG_FILE_NOT_FOUND,
};
use crate::registry::FileRegistry;

/// How long shutdown waits for handler threads before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Currently connected usernames mapped to the writable half of their
/// connection. An entry exists from successful handshake until the handler
/// deregisters on its way out. Consulted only to reject duplicate names and
/// to push notices; file operations never check liveness.
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<Mutex<TcpStream>>>>,
}

impl ClientRegistry {
    fn new() -> Self {
        ClientRegistry {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `name` for this connection. Returns the shared writer handle,
    /// or `None` if the name is already taken. The writer mutex keeps the
    /// handler's responses and pushed notices from interleaving on the wire.
    fn register(&self, name: &str, stream: &TcpStream) -> std::io::Result<Option<Arc<Mutex<TcpStream>>>> {
        let mut map = self.clients.lock();
        if map.contains_key(name) {
            return Ok(None);
        }
        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        map.insert(name.to_string(), Arc::clone(&writer));
        Ok(Some(writer))
    }

    /// Idempotent: removing an absent name is fine.
    fn remove(&self, name: &str) {
        self.clients.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.lock().contains_key(name)
    }

    pub fn usernames(&self) -> Vec<String> {
        self.clients.lock().keys().cloned().collect()
    }

    /// Best-effort framed `Notice` to one client. Returns false if the
    /// client is unknown or the send failed.
    pub fn notify(&self, name: &str, text: &str) -> bool {
        let writer = match self.clients.lock().get(name) {
            Some(w) => Arc::clone(w),
            None => return false,
        };
        let notice = Response::Notice {
            message: text.to_string(),
        };
        let sent = send_message(&mut *writer.lock(), &notice).is_ok();
        sent
    }

    /// Best-effort framed `Notice` to every connected client.
    pub fn notify_all(&self, text: &str) {
        let writers: Vec<Arc<Mutex<TcpStream>>> =
            self.clients.lock().values().cloned().collect();
        let notice = Response::Notice {
            message: text.to_string(),
        };
        for writer in writers {
            let _ = send_message(&mut *writer.lock(), &notice);
        }
    }

    /// Close every connection so blocked handler reads wake up.
    fn close_all(&self) {
        let writers: Vec<Arc<Mutex<TcpStream>>> =
            self.clients.lock().values().cloned().collect();
        for writer in writers {
            let _ = writer.lock().shutdown(Shutdown::Both);
        }
    }
}

struct ServerInner {
    files_dir: PathBuf,
    registry: FileRegistry,
    clients: ClientRegistry,
    running: AtomicBool,
    log: Box<dyn EventLog>,
    handlers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running server. Dropping it does not stop the server; call
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    inner: Arc<ServerInner>,
    local_addr: SocketAddr,
    accept_thread: Option<JoinHandle<()>>,
}

/// Bind `bind`, load the registry from `metadata_path`, and start accepting
/// connections. `files_dir` is created if absent. Registry/disk mismatches
/// found at startup are logged, not repaired.
pub fn start(
    bind: &str,
    files_dir: &Path,
    metadata_path: &Path,
    log: Box<dyn EventLog>,
) -> Result<ServerHandle> {
    fs::create_dir_all(files_dir)
        .with_context(|| format!("create files directory {}", files_dir.display()))?;
    let registry = FileRegistry::open(metadata_path)?;
    for line in registry.verify_against(files_dir)? {
        log.error("verify", &line);
    }

    let listener = TcpListener::bind(bind).with_context(|| format!("bind {}", bind))?;
    let local_addr = listener.local_addr()?;

    let inner = Arc::new(ServerInner {
        files_dir: files_dir.to_path_buf(),
        registry,
        clients: ClientRegistry::new(),
        running: AtomicBool::new(true),
        log,
        handlers: Mutex::new(Vec::new()),
    });

    let accept_inner = Arc::clone(&inner);
    let accept_thread = thread::spawn(move || accept_loop(listener, accept_inner));

    Ok(ServerHandle {
        inner,
        local_addr,
        accept_thread: Some(accept_thread),
    })
}

impl ServerHandle {
    /// Actual bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of currently connected usernames.
    pub fn connected_users(&self) -> Vec<String> {
        self.inner.clients.usernames()
    }

    /// Snapshot of the file registry.
    pub fn files(&self) -> Vec<crate::protocol::FileEntry> {
        self.inner.registry.snapshot()
    }

    /// Push unsolicited text to one connected client.
    pub fn notify(&self, username: &str, text: &str) -> bool {
        self.inner.clients.notify(username, text)
    }

    /// Stop accepting, tell clients, close their connections, wait a
    /// bounded time for handlers, and persist the registry a final time.
    pub fn shutdown(mut self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        // Wake the accept loop with a throwaway local connection.
        let _ = TcpStream::connect_timeout(&self.local_addr, Duration::from_millis(200));
        if let Some(t) = self.accept_thread.take() {
            let _ = t.join();
        }

        self.inner.clients.notify_all("Server is shutting down.");
        self.inner.clients.close_all();

        let handles: Vec<JoinHandle<()>> = self.inner.handlers.lock().drain(..).collect();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
            // A handler stuck past the grace period is abandoned; its thread
            // dies with the process.
        }

        self.inner.registry.persist().context("final registry persist")
    }
}

fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>) {
    loop {
        match listener.accept() {
            Ok((stream, _peer)) => {
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                stream.set_nodelay(true).ok();
                let conn_inner = Arc::clone(&inner);
                let handle = thread::spawn(move || handle_client(stream, conn_inner));
                inner.handlers.lock().push(handle);
            }
            Err(e) => {
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.log.error("accept", &e.to_string());
            }
        }
    }
}

/// Per-connection state machine: handshake, then the command loop, then
/// deregister and close. Every exit path runs the closing steps.
fn handle_client(mut stream: TcpStream, inner: Arc<ServerInner>) {
    let (username, writer) = match handshake(&mut stream, &inner) {
        Some(pair) => pair,
        None => return, // rejection already sent; nothing registered
    };

    loop {
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let cmd = match recv_message::<_, Command>(&mut stream) {
            Ok(cmd) => cmd,
            Err(WireError::ConnectionClosed) => break,
            Err(e) => {
                // Decode/framing trouble is fatal to this connection only.
                inner.log.error("recv", &format!("{}: {}", username, e));
                break;
            }
        };
        let resp = dispatch(&inner, &username, cmd);
        if let Err(e) = send_message(&mut *writer.lock(), &resp) {
            if !matches!(e, WireError::ConnectionClosed) {
                inner.log.error("send", &format!("{}: {}", username, e));
            }
            break;
        }
    }

    // Closing: deregistration is idempotent, shutdown errors are swallowed
    // after logging.
    inner.clients.remove(&username);
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        inner
            .log
            .error("close", &format!("{}: {}", username, e));
    }
    inner.log.disconnected(&username);
}

/// Raw (unframed) handshake: read the username, reply `CONNECTED` or an
/// `ERROR: ...` literal. Registration happens here so the duplicate check
/// and the map insert are one atomic step.
fn handshake(
    stream: &mut TcpStream,
    inner: &ServerInner,
) -> Option<(String, Arc<Mutex<TcpStream>>)> {
    let mut buf = [0u8; MAX_HANDSHAKE_BYTES];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return None,
        Ok(n) => n,
    };
    let username = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s.trim().to_string(),
        Err(_) => {
            let _ = stream.write_all(ERR_INVALID_NAME.as_bytes());
            return None;
        }
    };
    if username.is_empty() {
        let _ = stream.write_all(ERR_EMPTY_NAME.as_bytes());
        return None;
    }
    // The username becomes the on-disk path prefix of every composite key,
    // so it obeys the same rule as filenames: no separators, no dot-dirs.
    if !valid_filename(&username) {
        inner.log.rejected(&username, "invalid username");
        let _ = stream.write_all(ERR_INVALID_NAME.as_bytes());
        return None;
    }
    match inner.clients.register(&username, stream) {
        Ok(Some(writer)) => {
            if stream.write_all(HANDSHAKE_OK.as_bytes()).is_err() {
                inner.clients.remove(&username);
                return None;
            }
            inner.log.connected(&username);
            Some((username, writer))
        }
        Ok(None) => {
            inner.log.rejected(&username, "name already in use");
            let _ = stream.write_all(ERR_NAME_IN_USE.as_bytes());
            None
        }
        Err(e) => {
            inner.log.error("handshake", &format!("{}: {}", username, e));
            None
        }
    }
}

fn dispatch(inner: &ServerInner, user: &str, cmd: Command) -> Response {
    match cmd {
        Command::Upload { filename, content } => handle_upload(inner, user, &filename, &content),
        Command::List => Response::FileList(inner.registry.snapshot()),
        Command::Delete { filename } => handle_delete(inner, user, &filename),
        Command::Download { owner, filename } => handle_download(inner, &owner, &filename),
    }
}

/// Disk write first, then the registry insert, then persistence. A failed
/// write leaves the registry untouched; a failed persist is logged and the
/// in-memory mutation stands (availability over strict durability).
fn handle_upload(inner: &ServerInner, user: &str, filename: &str, content: &[u8]) -> Response {
    if !valid_filename(filename) {
        inner
            .log
            .error("upload", &format!("{}: invalid filename {:?}", user, filename));
        return Response::UploadFailed;
    }
    let key = composite_key(user, filename);
    let path = inner.files_dir.join(&key);
    if let Err(e) = fs::write(&path, content) {
        inner.log.error("upload", &format!("{}: {}", key, e));
        return Response::UploadFailed;
    }
    inner.registry.insert(user, filename);
    persist_soft(inner);
    inner.log.uploaded(user, &key, content.len() as u64);
    Response::UploadOk
}

/// The composite key is always built from the requesting user's own name; a
/// client can never address another owner's file for deletion.
fn handle_delete(inner: &ServerInner, user: &str, filename: &str) -> Response {
    if !valid_filename(filename) {
        return Response::Error {
            message: MSG_FILE_NOT_FOUND.to_string(),
        };
    }
    let key = composite_key(user, filename);
    let path = inner.files_dir.join(&key);
    if !path.is_file() {
        return Response::Error {
            message: MSG_FILE_NOT_FOUND.to_string(),
        };
    }
    if let Err(e) = fs::remove_file(&path) {
        inner.log.error("delete", &format!("{}: {}", key, e));
        return Response::Error {
            message: format!("Could not delete file: {}", e),
        };
    }
    inner.registry.remove(user, filename);
    persist_soft(inner);
    inner.log.deleted(user, &key);
    Response::DeleteOk
}

/// Reads carry no ownership restriction: any client may download any
/// owner's file by naming it.
fn handle_download(inner: &ServerInner, owner: &str, filename: &str) -> Response {
    if !valid_filename(owner) || !valid_filename(filename) {
        return Response::Error {
            message: MSG_FILE_NOT_FOUND.to_string(),
        };
    }
    let key = composite_key(owner, filename);
    let path = inner.files_dir.join(&key);
    match fs::read(&path) {
        Ok(content) => Response::DownloadOk { content },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Response::Error {
            message: MSG_FILE_NOT_FOUND.to_string(),
        },
        Err(e) => {
            inner.log.error("download", &format!("{}: {}", key, e));
            Response::Error {
                message: format!("Could not read file: {}", e),
            }
        }
    }
}

fn persist_soft(inner: &ServerInner) {
    if let Err(e) = inner.registry.persist() {
        inner.log.error("persist", &format!("{:#}", e));
    }
}
