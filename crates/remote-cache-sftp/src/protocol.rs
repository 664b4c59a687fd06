//! SFTP Protocol Implementation
//!
//! Wire types of the SSH File Transfer Protocol as defined in
//! draft-ietf-secsh-filexfer-02 (protocol version 3), the version spoken by
//! OpenSSH and most servers.
//!
//! The SFTP protocol runs over the SSH connection protocol (RFC 4254),
//! using the "sftp" subsystem. Every packet is framed as
//! `uint32 length, byte type, payload`.

use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use remote_cache_core::EntryKind;
use std::fmt;

/// SFTP Protocol Version
pub const SFTP_VERSION: u32 = 3;

/// Largest packet accepted from the server
pub const MAX_PACKET_LEN: u32 = 256 * 1024;

/// SFTP v3 message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close file
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Get file attributes by path
    Lstat = 7,
    /// Get file attributes by handle
    Fstat = 8,
    /// Set file attributes by path
    Setstat = 9,
    /// Set file attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Get real path
    Realpath = 16,
    /// Get file attributes by path (follow symlinks)
    Stat = 17,
    /// Rename file or directory
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (for directory listings)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::Init),
            2 => Ok(MessageType::Version),
            3 => Ok(MessageType::Open),
            4 => Ok(MessageType::Close),
            5 => Ok(MessageType::Read),
            6 => Ok(MessageType::Write),
            7 => Ok(MessageType::Lstat),
            8 => Ok(MessageType::Fstat),
            9 => Ok(MessageType::Setstat),
            10 => Ok(MessageType::Fsetstat),
            11 => Ok(MessageType::Opendir),
            12 => Ok(MessageType::Readdir),
            13 => Ok(MessageType::Remove),
            14 => Ok(MessageType::Mkdir),
            15 => Ok(MessageType::Rmdir),
            16 => Ok(MessageType::Realpath),
            17 => Ok(MessageType::Stat),
            18 => Ok(MessageType::Rename),
            19 => Ok(MessageType::Readlink),
            20 => Ok(MessageType::Symlink),
            101 => Ok(MessageType::Status),
            102 => Ok(MessageType::Handle),
            103 => Ok(MessageType::Data),
            104 => Ok(MessageType::Name),
            105 => Ok(MessageType::Attrs),
            200 => Ok(MessageType::Extended),
            201 => Ok(MessageType::ExtendedReply),
            _ => Err(Error::Protocol(format!("Unknown message type: {}", value))),
        }
    }
}

/// SFTP Status codes (RFC draft-ietf-secsh-filexfer)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

impl StatusCode {
    /// Map a wire code; codes from later protocol versions become `Failure`
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            _ => StatusCode::Failure,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusCode::Ok => "SSH_FX_OK",
            StatusCode::Eof => "SSH_FX_EOF",
            StatusCode::NoSuchFile => "SSH_FX_NO_SUCH_FILE",
            StatusCode::PermissionDenied => "SSH_FX_PERMISSION_DENIED",
            StatusCode::Failure => "SSH_FX_FAILURE",
            StatusCode::BadMessage => "SSH_FX_BAD_MESSAGE",
            StatusCode::NoConnection => "SSH_FX_NO_CONNECTION",
            StatusCode::ConnectionLost => "SSH_FX_CONNECTION_LOST",
            StatusCode::OpUnsupported => "SSH_FX_OP_UNSUPPORTED",
        };
        f.write_str(label)
    }
}

/// File open flags (SSH_FXF_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading
    pub const READ: u32 = 0x00000001;
    /// Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// Create the file if missing
    pub const CREAT: u32 = 0x00000008;
    /// Truncate an existing file
    pub const TRUNC: u32 = 0x00000010;

    /// Open an existing file for reading
    pub fn read_only() -> Self {
        Self(Self::READ)
    }

    /// Create or truncate a file for writing
    pub fn create_truncate() -> Self {
        Self(Self::WRITE | Self::CREAT | Self::TRUNC)
    }
}

/// POSIX file type bits carried in `permissions`
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// File attributes (ATTRS block)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// Size in bytes
    pub size: Option<u64>,
    /// Owner id, sent together with `gid`
    pub uid: Option<u32>,
    /// Group id, sent together with `uid`
    pub gid: Option<u32>,
    /// POSIX mode including the file type bits
    pub permissions: Option<u32>,
    /// Access time, sent together with `mtime`
    pub atime: Option<u32>,
    /// Modification time, sent together with `atime`
    pub mtime: Option<u32>,
}

impl FileAttrs {
    const FLAG_SIZE: u32 = 0x00000001;
    const FLAG_UIDGID: u32 = 0x00000002;
    const FLAG_PERMISSIONS: u32 = 0x00000004;
    const FLAG_ACMODTIME: u32 = 0x00000008;
    const FLAG_EXTENDED: u32 = 0x80000000;

    /// Attributes for a new directory
    pub fn directory_mode(mode: u32) -> Self {
        Self {
            permissions: Some(mode),
            ..Self::default()
        }
    }

    /// Entry kind derived from the permission bits, if the server sent them
    pub fn kind(&self) -> Option<EntryKind> {
        let mode = self.permissions?;
        Some(match mode & S_IFMT {
            S_IFDIR => EntryKind::Dir,
            S_IFREG => EntryKind::File,
            S_IFLNK => EntryKind::Symlink,
            _ => EntryKind::Other,
        })
    }

    /// Whether the permission bits mark a directory
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(EntryKind::Dir)
    }

    /// Encode file attributes to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
    }

    /// Decode file attributes from bytes
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = codec::get_u32(buf, "attribute flags")?;
        let mut attrs = FileAttrs::default();

        if flags & Self::FLAG_SIZE != 0 {
            if buf.remaining() < 8 {
                return Err(Error::Protocol("Insufficient data for size".into()));
            }
            attrs.size = Some(buf.get_u64());
        }

        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf, "uid")?);
            attrs.gid = Some(codec::get_u32(buf, "gid")?);
        }

        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf, "permissions")?);
        }

        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf, "atime")?);
            attrs.mtime = Some(codec::get_u32(buf, "mtime")?);
        }

        // Extended attributes are skipped
        if flags & Self::FLAG_EXTENDED != 0 {
            let count = codec::get_u32(buf, "extended count")?;
            for _ in 0..count {
                codec::get_bytes(buf)?;
                codec::get_bytes(buf)?;
            }
        }

        Ok(attrs)
    }
}

/// Helper functions for encoding/decoding SFTP protocol strings
pub mod codec {
    use crate::{Error, Result};
    use bytes::{Buf, BufMut, BytesMut};

    /// Encode a string as SFTP string (length + data)
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    /// Decode an SFTP string
    pub fn get_string(buf: &mut &[u8]) -> Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("Invalid UTF-8 string: {}", e)))
    }

    /// Encode bytes as SFTP string (length + data)
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    /// Decode SFTP bytes
    pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
        let len = get_u32(buf, "bytes length")? as usize;
        if buf.remaining() < len {
            return Err(Error::Protocol("Insufficient data for bytes".into()));
        }

        let bytes = buf[..len].to_vec();
        buf.advance(len);
        Ok(bytes)
    }

    /// Decode a big-endian `uint32`
    pub fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
        if buf.remaining() < 4 {
            return Err(Error::Protocol(format!("Insufficient data for {}", what)));
        }
        Ok(buf.get_u32())
    }
}
