//! Blocking client side of the depot protocol
//!
//! One request/response exchange at a time over a single connection. The
//! raw handshake happens in [`Client::connect`]; everything afterwards is
//! framed. Unsolicited `Notice` frames that arrive while a response is
//! awaited are handed to the notice callback and the read continues.

use anyhow::{bail, Result};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use thiserror::Error;

use crate::framing::{recv_message, send_message, WireError};
use crate::protocol::{Command, FileEntry, Response, HANDSHAKE_OK, MAX_HANDSHAKE_BYTES};

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server answered the handshake with an `ERROR: ...` reply, e.g.
    /// for a duplicate username. The connection is closed by the server.
    #[error("server rejected connection: {0}")]
    Rejected(String),
    #[error("handshake failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Client {
    stream: TcpStream,
    username: String,
    on_notice: Option<Box<dyn FnMut(&str) + Send>>,
}

impl Client {
    /// Connect and perform the raw handshake as `username`.
    pub fn connect<A: ToSocketAddrs>(addr: A, username: &str) -> Result<Self, ConnectError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        stream.write_all(username.as_bytes())?;

        let mut buf = [0u8; MAX_HANDSHAKE_BYTES];
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(ConnectError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection during handshake",
            )));
        }
        let reply = String::from_utf8_lossy(&buf[..n]).to_string();
        if reply != HANDSHAKE_OK {
            return Err(ConnectError::Rejected(reply));
        }
        Ok(Client {
            stream,
            username: username.to_string(),
            on_notice: None,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Install a callback for server-pushed notices. Notices are only
    /// observed while a response is being awaited; this is a blocking
    /// client with no background reader.
    pub fn on_notice<F: FnMut(&str) + Send + 'static>(&mut self, callback: F) {
        self.on_notice = Some(Box::new(callback));
    }

    /// Send one command and wait for its (non-notice) response.
    fn request(&mut self, cmd: &Command) -> Result<Response, WireError> {
        send_message(&mut self.stream, cmd)?;
        loop {
            match recv_message::<_, Response>(&mut self.stream)? {
                Response::Notice { message } => {
                    if let Some(cb) = self.on_notice.as_mut() {
                        cb(&message);
                    }
                }
                resp => return Ok(resp),
            }
        }
    }

    pub fn upload(&mut self, filename: &str, content: &[u8]) -> Result<()> {
        let cmd = Command::Upload {
            filename: filename.to_string(),
            content: content.to_vec(),
        };
        match self.request(&cmd)? {
            Response::UploadOk => Ok(()),
            Response::UploadFailed => bail!("upload failed"),
            Response::Error { message } => bail!(message),
            other => bail!("unexpected response to upload: {:?}", other),
        }
    }

    pub fn list(&mut self) -> Result<Vec<FileEntry>> {
        match self.request(&Command::List)? {
            Response::FileList(entries) => Ok(entries),
            Response::Error { message } => bail!(message),
            other => bail!("unexpected response to list: {:?}", other),
        }
    }

    pub fn delete(&mut self, filename: &str) -> Result<()> {
        let cmd = Command::Delete {
            filename: filename.to_string(),
        };
        match self.request(&cmd)? {
            Response::DeleteOk => Ok(()),
            Response::Error { message } => bail!(message),
            other => bail!("unexpected response to delete: {:?}", other),
        }
    }

    pub fn download(&mut self, owner: &str, filename: &str) -> Result<Vec<u8>> {
        let cmd = Command::Download {
            owner: owner.to_string(),
            filename: filename.to_string(),
        };
        match self.request(&cmd)? {
            Response::DownloadOk { content } => Ok(content),
            Response::Error { message } => bail!(message),
            other => bail!("unexpected response to download: {:?}", other),
        }
    }

    /// Graceful close; errors from the shutdown attempt are ignored.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
