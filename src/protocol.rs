//! Shared protocol vocabulary for the Depot framed transport
//!
//! The handshake is deliberately unframed: the client writes its raw
//! username bytes, the server answers with a raw literal. Everything after
//! that travels as framed `Command`/`Response` objects (see `framing`).

use serde::{Deserialize, Serialize};

/// Fixed width of the ASCII decimal length header, in bytes.
pub const HEADER_LEN: usize = 10;

/// Raw handshake acknowledgement sent by the server on success.
pub const HANDSHAKE_OK: &str = "CONNECTED";

/// Every handshake rejection starts with this prefix.
pub const HANDSHAKE_ERR_PREFIX: &str = "ERROR";

/// Rejection reply for a username already held by a live connection.
pub const ERR_NAME_IN_USE: &str = "ERROR: Name already in use.";

/// Rejection reply for a blank username.
pub const ERR_EMPTY_NAME: &str = "ERROR: Username must not be empty.";

/// Rejection reply for a username that is not valid text.
pub const ERR_INVALID_NAME: &str = "ERROR: Invalid username.";

/// Structured error message for delete/download of an absent key.
pub const MSG_FILE_NOT_FOUND: &str = "File not found.";

/// Upper bound on the raw handshake read. Usernames are short strings;
/// anything beyond this is not a handshake.
pub const MAX_HANDSHAKE_BYTES: usize = 1024;

/// One client request, decoded from a single frame. Closed set: an
/// unrecognized command cannot fall through dispatch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Command {
    /// Store `content` under the caller's namespace.
    Upload { filename: String, content: Vec<u8> },
    /// Enumerate every stored file and its owner.
    List,
    /// Remove a file from the caller's own namespace only.
    Delete { filename: String },
    /// Fetch any owner's file; reads carry no ownership restriction.
    Download { owner: String, filename: String },
}

/// One entry of a `List` reply. `filename` is the composite on-disk name
/// (owner-prefixed), as stored in the registry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub owner: String,
}

/// One server reply, or an unsolicited `Notice` pushed outside the
/// request/response rhythm.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Response {
    UploadOk,
    UploadFailed,
    FileList(Vec<FileEntry>),
    DeleteOk,
    DownloadOk { content: Vec<u8> },
    Error { message: String },
    Notice { message: String },
}

/// The owner-qualified on-disk filename. This prefix is the sole
/// namespacing mechanism between owners; it is not a security boundary.
pub fn composite_key(owner: &str, filename: &str) -> String {
    format!("{}_{}", owner, filename)
}

/// Strip the owner prefix from a composite key for display.
pub fn display_name(key: &str) -> &str {
    key.split_once('_').map(|(_, rest)| rest).unwrap_or(key)
}

/// Reject filenames that could escape the files directory or produce an
/// unaddressable key. Field validation belongs here at the handler side,
/// not in the framing layer.
pub fn valid_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
        && name != "."
        && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_is_owner_prefixed() {
        assert_eq!(composite_key("alice", "report.txt"), "alice_report.txt");
    }

    #[test]
    fn display_name_strips_only_first_owner_segment() {
        assert_eq!(display_name("alice_report.txt"), "report.txt");
        // Underscores inside the original filename survive
        assert_eq!(display_name("alice_my_notes.txt"), "my_notes.txt");
        assert_eq!(display_name("plain"), "plain");
    }

    #[test]
    fn filename_validation() {
        assert!(valid_filename("report.txt"));
        assert!(valid_filename("notes v2.md"));
        assert!(!valid_filename(""));
        assert!(!valid_filename("../escape"));
        assert!(!valid_filename("a/b"));
        assert!(!valid_filename("a\\b"));
        assert!(!valid_filename("nul\0byte"));
        assert!(!valid_filename(".."));
    }
}
