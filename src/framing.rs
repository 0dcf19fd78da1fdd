//! Length-prefixed framed channel over a raw byte stream
//!
//! Every message is a 10-byte ASCII decimal length header (left-justified,
//! space-padded) followed by exactly that many bincode payload bytes. The
//! receiver loops on partial reads until the full payload arrives, so a
//! frame is always delivered whole or not at all.
//!
//! No upper bound is placed on the payload length; a very large upload is
//! fully buffered in memory. Accepted scalability limit of this design.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::protocol::HEADER_LEN;

#[derive(Debug, Error)]
pub enum WireError {
    /// Peer disconnected, or a send/receive failed mid-stream. A short read
    /// is a clean disconnect, not corruption. Fatal to one connection only.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// The 10-byte header was not a valid ASCII decimal integer.
    #[error("malformed length header: {0}")]
    Framing(String),
    /// Payload arrived whole but did not decode.
    #[error("payload decode failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => WireError::ConnectionClosed,
            _ => WireError::Io(e),
        }
    }
}

/// Serialize `msg` and write it as one frame. The caller is the single
/// writer for this stream; interleaving writers must serialize externally.
pub fn send_message<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), WireError> {
    let payload = bincode::serialize(msg)?;
    let header = format!("{:<width$}", payload.len(), width = HEADER_LEN);
    debug_assert_eq!(header.len(), HEADER_LEN);
    w.write_all(header.as_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read exactly one frame and decode it.
pub fn recv_message<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, WireError> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    let text = std::str::from_utf8(&header)
        .map_err(|_| WireError::Framing("header is not ASCII".to_string()))?;
    let len: usize = text
        .trim()
        .parse()
        .map_err(|_| WireError::Framing(format!("not a decimal length: {:?}", text)))?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Response};
    use std::io::Cursor;

    #[test]
    fn round_trip_command() {
        let cmd = Command::Upload {
            filename: "report.txt".to_string(),
            content: b"hello".to_vec(),
        };
        let mut buf = Vec::new();
        send_message(&mut buf, &cmd).unwrap();
        let got: Command = recv_message(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(got, cmd);
    }

    #[test]
    fn header_is_left_justified_space_padded_decimal() {
        let mut buf = Vec::new();
        send_message(&mut buf, &Command::List).unwrap();
        let header = std::str::from_utf8(&buf[..HEADER_LEN]).unwrap();
        let len: usize = header.trim().parse().unwrap();
        assert_eq!(len, buf.len() - HEADER_LEN);
        // Left-justified: digits first, padding after
        assert!(header.starts_with(char::is_numeric));
        assert!(header.ends_with(' '));
    }

    #[test]
    fn multiple_frames_on_one_stream() {
        let mut buf = Vec::new();
        send_message(&mut buf, &Response::UploadOk).unwrap();
        send_message(
            &mut buf,
            &Response::Error {
                message: "File not found.".to_string(),
            },
        )
        .unwrap();
        let mut cur = Cursor::new(&buf);
        let a: Response = recv_message(&mut cur).unwrap();
        let b: Response = recv_message(&mut cur).unwrap();
        assert_eq!(a, Response::UploadOk);
        assert!(matches!(b, Response::Error { .. }));
    }

    #[test]
    fn eof_before_header_is_connection_closed() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        let err = recv_message::<_, Command>(&mut cur).unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn truncated_payload_is_connection_closed() {
        let mut buf = Vec::new();
        send_message(&mut buf, &Command::List).unwrap();
        buf.truncate(buf.len() - 1);
        let err = recv_message::<_, Command>(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn garbage_header_is_framing_error() {
        let mut buf = b"xyzzyxyzzy".to_vec();
        buf.extend_from_slice(&[0u8; 4]);
        let err = recv_message::<_, Command>(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, WireError::Framing(_)));
    }

    #[test]
    fn empty_content_round_trips() {
        let cmd = Command::Upload {
            filename: "empty.bin".to_string(),
            content: Vec::new(),
        };
        let mut buf = Vec::new();
        send_message(&mut buf, &cmd).unwrap();
        let got: Command = recv_message(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(got, cmd);
    }
}
