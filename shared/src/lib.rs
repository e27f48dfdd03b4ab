use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sent once to a newly registered client, carrying its session id
pub const CONNECTED: &str = "Connected";
/// Inbound heartbeat request
pub const HEARTBEAT: &str = "Heartbeat";
/// Outbound heartbeat answer carrying the current server time
pub const RESPONSE_HEARTBEAT: &str = "ResponseHeartbeat";
/// Inbound server status request
pub const SERVER_STATUS: &str = "ServerStatus";
/// Outbound status answer carrying a full `ServerStatus` snapshot
pub const RESPONSE_SERVER_STATUS: &str = "ResponseServerStatus";

/// Largest encoded packet accepted on a stream connection
pub const MAX_FRAME_LEN: usize = 64 * 1024;
/// Receive buffer size for the datagram listener
pub const MAX_DATAGRAM_LEN: usize = 2048;

const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

/// Typed message container addressed by its `kind` key.
///
/// The payload is opaque to the transport; handlers decode it with
/// [`Packet::body`] when they expect one.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_body<T: Serialize>(kind: impl Into<String>, body: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: kind.into(),
            payload: bincode::serialize(body)?,
        })
    }

    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub fn has_body(&self) -> bool {
        !self.payload.is_empty()
    }
}

/// Load classification, ordered by severity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Standard = 0,
    Crowded = 1,
    Full = 2,
}

impl StatusCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StatusCode::Standard),
            1 => Some(StatusCode::Crowded),
            2 => Some(StatusCode::Full),
            _ => None,
        }
    }
}

/// Snapshot of the server's advertised state, as reported to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub id: u32,
    pub group_id: u32,
    pub name: String,
    pub status: StatusCode,
    pub server_time: u64,
}

/// A packet sent over the datagram listener, tagged with the sender's session id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub client_id: String,
    pub packet: Packet,
}

/// Encodes a packet as a length-prefixed frame (u32 big-endian length, then bincode body)
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads one frame from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a
/// new frame started. A connection dropped mid-frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Packet>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub fn encode_datagram(datagram: &Datagram) -> Result<Vec<u8>, ProtocolError> {
    let data = bincode::serialize(datagram)?;
    if data.len() > MAX_DATAGRAM_LEN {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(data)
}

pub fn decode_datagram(data: &[u8]) -> Result<Datagram, ProtocolError> {
    Ok(bincode::deserialize(data)?)
}
