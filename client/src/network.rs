use log::{debug, info};
use shared::{
    encode_datagram, read_frame, write_frame, Datagram, Packet, ProtocolError, ServerStatus, CONNECTED,
    HEARTBEAT, RESPONSE_HEARTBEAT, RESPONSE_SERVER_STATUS, SERVER_STATUS,
};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    Closed,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Datagram socket not attached")]
    NoDatagramSocket,
}

/// Headless client that talks to the game server over TCP (and optionally UDP).
///
/// Used for probing a running server and for driving it from tests.
pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    client_id: String,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
    udp: Option<(UdpSocket, SocketAddr)>,
    timeout: Duration,
}

impl Client {
    /// Connects and waits for the server's `Connected` packet
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(addr: impl ToSocketAddrs, wait: Duration) -> Result<Self, ClientError> {
        let stream = timeout(wait, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout("connection".to_string()))??;
        stream.set_nodelay(true)?;

        let local_addr = stream.local_addr()?;
        let server_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let mut client = Client {
            reader,
            writer,
            client_id: String::new(),
            local_addr,
            server_addr,
            udp: None,
            timeout: wait,
        };

        let welcome = client.recv_kind(CONNECTED).await?;
        client.client_id = welcome.body()?;
        info!("Connected to {} as {}", server_addr, client.client_id);

        Ok(client)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        write_frame(&mut self.writer, packet).await?;
        Ok(())
    }

    /// Waits for the next packet from the server
    pub async fn recv(&mut self) -> Result<Packet, ClientError> {
        match timeout(self.timeout, read_frame(&mut self.reader)).await {
            Ok(Ok(Some(packet))) => Ok(packet),
            Ok(Ok(None)) => Err(ClientError::Closed),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Timeout("packet".to_string())),
        }
    }

    /// Like `recv`, but gives up after `wait` and returns `None`
    pub async fn try_recv_within(&mut self, wait: Duration) -> Result<Option<Packet>, ClientError> {
        match timeout(wait, read_frame(&mut self.reader)).await {
            Ok(Ok(Some(packet))) => Ok(Some(packet)),
            Ok(Ok(None)) => Err(ClientError::Closed),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Reads until a packet of `kind` arrives, skipping anything else
    pub async fn recv_kind(&mut self, kind: &str) -> Result<Packet, ClientError> {
        loop {
            let packet = self.recv().await.map_err(|e| match e {
                ClientError::Timeout(_) => ClientError::Timeout(kind.to_string()),
                other => other,
            })?;

            if packet.kind == kind {
                return Ok(packet);
            }
            debug!("Skipping {} while waiting for {}", packet.kind, kind);
        }
    }

    /// Sends a heartbeat and returns the server time from the response
    pub async fn heartbeat(&mut self) -> Result<u64, ClientError> {
        let request = Packet::with_body(HEARTBEAT, &current_timestamp())?;
        self.send(&request).await?;

        let response = self.recv_kind(RESPONSE_HEARTBEAT).await?;
        Ok(response.body()?)
    }

    pub async fn request_status(&mut self) -> Result<ServerStatus, ClientError> {
        self.send(&Packet::new(SERVER_STATUS)).await?;

        let response = self.recv_kind(RESPONSE_SERVER_STATUS).await?;
        Ok(response.body()?)
    }

    /// Binds a datagram socket on the same local IP as the stream connection
    pub async fn attach_udp(&mut self, server_udp: SocketAddr) -> Result<(), ClientError> {
        let socket = UdpSocket::bind((self.local_addr.ip(), 0)).await?;
        self.udp = Some((socket, server_udp));
        Ok(())
    }

    /// Sends `packet` over UDP tagged with this client's id.
    /// Any response still arrives on the stream connection.
    pub async fn send_datagram(&self, packet: Packet) -> Result<(), ClientError> {
        let (socket, server_udp) = self.udp.as_ref().ok_or(ClientError::NoDatagramSocket)?;
        let data = encode_datagram(&Datagram {
            client_id: self.client_id.clone(),
            packet,
        })?;
        socket.send_to(&data, *server_udp).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection, sends the welcome packet, then answers each
    /// heartbeat with an unrelated packet followed by a fixed server time.
    async fn fake_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (mut reader, mut writer) = stream.into_split();

            let welcome = Packet::with_body(CONNECTED, &"client-7".to_string()).unwrap();
            if write_frame(&mut writer, &welcome).await.is_err() {
                return;
            }

            while let Ok(Some(request)) = read_frame(&mut reader).await {
                if request.kind != HEARTBEAT {
                    continue;
                }
                let _ = write_frame(&mut writer, &Packet::new("Noise")).await;
                let response = Packet::with_body(RESPONSE_HEARTBEAT, &4242u64).unwrap();
                let _ = write_frame(&mut writer, &response).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_connect_reads_client_id() {
        let addr = fake_server().await;
        let client = Client::connect(addr).await.unwrap();

        assert_eq!(client.client_id(), "client-7");
        assert_eq!(client.server_addr(), addr);
    }

    #[tokio::test]
    async fn test_heartbeat_skips_unrelated_packets() {
        let addr = fake_server().await;
        let mut client = Client::connect(addr).await.unwrap();

        assert_eq!(client.heartbeat().await.unwrap(), 4242);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_datagram_requires_socket() {
        let addr = fake_server().await;
        let client = Client::connect(addr).await.unwrap();

        let result = client.send_datagram(Packet::new(HEARTBEAT)).await;
        assert!(matches!(result, Err(ClientError::NoDatagramSocket)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        assert!(Client::connect(addr).await.is_err());
    }
}
