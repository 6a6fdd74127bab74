//! Relay stage: answering the request and bridging client and destination.
//!
//! Once the handshake has accepted a request, ownership of the client
//! stream moves into a [`RelaySession`] handed to the server's
//! [`RelayHandler`]. The session's `send_status` is the only way to answer
//! the request. [`DirectRelay`] is the built-in handler that dials the
//! destination over TCP and splices the two streams.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep_until, timeout, Instant};

use super::connection::{Connection, Destination};
use super::frame_reader::FrameReader;
use crate::error::{Result, Socks5Error};
use crate::protocol::{self, Command, ReplyStatus};

const RELAY_BUFFER_SIZE: usize = 8192;

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Client stream after the handshake. Reads return any bytes the client
/// sent ahead of the reply before reading from the socket again.
pub type ClientStream = FrameReader<BoxedStream>;

/// An accepted request waiting for its reply.
pub struct RelaySession {
    connection: Connection,
    /// `None` once a failure reply has closed the client stream
    stream: Option<ClientStream>,
    status: Option<ReplyStatus>,
}

impl RelaySession {
    pub(crate) fn new(connection: Connection, stream: ClientStream) -> Self {
        Self {
            connection,
            stream: Some(stream),
            status: None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.connection.destination()
    }

    /// Status already sent, if any.
    pub fn status_sent(&self) -> Option<ReplyStatus> {
        self.status
    }

    /// True once a failure reply has closed the client stream.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Write the reply frame for `status`.
    ///
    /// Any status other than `REQUEST_GRANTED` closes the client stream
    /// after the write and the session gives up the stream for good.
    /// A request is answered once; later calls write nothing.
    pub async fn send_status(&mut self, status: ReplyStatus) -> Result<()> {
        if let Some(sent) = self.status {
            warn!(
                "[conn {}] Relay handler sent {} after already replying {}",
                self.connection.id(),
                status,
                sent
            );
            return Ok(());
        }
        self.status = Some(status);

        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream.write_all(&protocol::reply(status)).await?;
        stream.flush().await?;
        debug!("[conn {}] Replied {}", self.connection.id(), status);

        if status.is_success() {
            self.stream = Some(stream);
        } else {
            let _ = stream.shutdown().await;
            // Dropping the stream closes the read side as well
            drop(stream);
        }
        Ok(())
    }

    /// Send a status by its canonical name, e.g. `"HOST_UNREACHABLE"`.
    ///
    /// An unknown name is an internal error and nothing is written.
    pub async fn send_status_named(&mut self, name: &str) -> Result<()> {
        let status: ReplyStatus = name.parse()?;
        self.send_status(status).await
    }

    /// Take the connection and client stream, e.g. to start relaying after
    /// a granted reply. Fails once a failure reply has closed the stream.
    pub fn into_parts(self) -> Result<(Connection, ClientStream)> {
        match self.stream {
            Some(stream) => Ok((self.connection, stream)),
            None => Err(Socks5Error::Relay(format!(
                "client stream closed after {} reply",
                self.status.map(|s| s.name()).unwrap_or("failure")
            ))),
        }
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("connection", &self.connection)
            .field("status", &self.status)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Fulfils accepted requests.
#[async_trait]
pub trait RelayHandler: Send + Sync {
    async fn relay(&self, session: RelaySession) -> Result<()>;
}

/// Built-in relay handler: TCP connect to the destination, then splice.
///
/// Only `connect` is served; any other command is answered with
/// `COMMAND_NOT_SUPPORTED`.
#[derive(Debug, Clone)]
pub struct DirectRelay {
    connect_timeout: Option<Duration>,
    idle_timeout: Duration,
    nodelay: bool,
}

impl Default for DirectRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectRelay {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
            idle_timeout: Duration::ZERO,
            nodelay: true,
        }
    }

    /// Bound name resolution and each connect attempt by `limit`.
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }

    /// Close the relay when a direction is idle for `idle` (zero disables).
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Resolve and connect, trying each resolved address in order.
    async fn dial(&self, host: &str, port: u16) -> std::result::Result<TcpStream, ReplyStatus> {
        let lookup = lookup_host((host, port));
        let resolved = match self.connect_timeout {
            Some(limit) => match timeout(limit, lookup).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("resolution timed out after {:?}", limit),
                )),
            },
            None => lookup.await,
        };
        let addrs: Vec<SocketAddr> = match resolved {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("Failed to resolve {}: {}", host, e);
                return Err(ReplyStatus::HostUnreachable);
            }
        };

        let mut last_error = None;
        for addr in addrs {
            let attempt = TcpStream::connect(addr);
            let result = match self.connect_timeout {
                Some(limit) => match timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", limit),
                    )),
                },
                None => attempt.await,
            };
            match result {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(map_connect_error(&e)),
            // Resolved to nothing
            None => Err(ReplyStatus::HostUnreachable),
        }
    }
}

#[async_trait]
impl RelayHandler for DirectRelay {
    async fn relay(&self, mut session: RelaySession) -> Result<()> {
        let Some(destination) = session.destination().cloned() else {
            return session.send_status(ReplyStatus::GeneralFailure).await;
        };
        if destination.command != Command::Connect {
            return session
                .send_status(ReplyStatus::CommandNotSupported)
                .await;
        }

        let id = session.connection().id();
        let target = match self.dial(&destination.address, destination.port).await {
            Ok(target) => target,
            Err(status) => {
                debug!("[conn {}] Dial {} failed: {}", id, destination, status);
                return session.send_status(status).await;
            }
        };
        if self.nodelay {
            if let Err(e) = target.set_nodelay(true) {
                trace!("[conn {}] Failed to set TCP_NODELAY: {}", id, e);
            }
        }

        session.send_status(ReplyStatus::RequestGranted).await?;
        let (_connection, client) = session.into_parts()?;
        debug!("[conn {}] Relaying to {}", id, destination);
        splice(client, target, self.idle_timeout).await;
        debug!("[conn {}] Relay to {} ended", id, destination);
        Ok(())
    }
}

/// Map an outbound connect error to the reply status sent to the client.
pub fn map_connect_error(e: &io::Error) -> ReplyStatus {
    use io::ErrorKind::*;
    match e.kind() {
        NotFound | TimedOut | AddrNotAvailable | HostUnreachable => ReplyStatus::HostUnreachable,
        NetworkUnreachable => ReplyStatus::NetworkUnreachable,
        ConnectionRefused => ReplyStatus::ConnectionRefused,
        _ => ReplyStatus::GeneralFailure,
    }
}

/// Forward bytes both ways until one side closes.
///
/// When the client side ends first both streams are dropped, which closes
/// the destination. When the destination ends first its EOF is passed on and
/// client bytes keep flowing until the client closes too. A non-zero
/// `idle_timeout` ends the relay once no byte has moved in either direction
/// for that long.
pub async fn splice<C, T>(client: C, target: T, idle_timeout: Duration)
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (client_read, client_write) = split(client);
    let (target_read, target_write) = split(target);
    let activity = Activity::new();

    let upstream = pump(client_read, target_write, "client->target", &activity);
    let downstream = pump(target_read, client_write, "target->client", &activity);
    let watchdog = idle_watchdog(&activity, idle_timeout);
    tokio::pin!(upstream);
    tokio::pin!(downstream);
    tokio::pin!(watchdog);

    tokio::select! {
        result = &mut upstream => {
            debug!("Client to target copy finished: {:?}", result);
        }
        result = &mut downstream => {
            debug!("Target to client copy finished: {:?}", result);
            tokio::select! {
                result = &mut upstream => {
                    debug!("Client to target copy finished: {:?}", result);
                }
                _ = &mut watchdog => {
                    debug!("Client idle for {:?} after target closed", idle_timeout);
                }
            }
        }
        _ = &mut watchdog => {
            debug!("Relay idle for {:?}, closing", idle_timeout);
        }
    }
}

/// Last time a byte moved in either direction of a relay.
struct Activity(Mutex<Instant>);

impl Activity {
    fn new() -> Self {
        Self(Mutex::new(Instant::now()))
    }

    fn touch(&self) {
        *self.0.lock() = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.0.lock()
    }
}

/// Completes once nothing has moved for `idle`. Never completes for zero.
async fn idle_watchdog(activity: &Activity, idle: Duration) {
    if idle.is_zero() {
        return std::future::pending::<()>().await;
    }
    loop {
        let deadline = activity.last() + idle;
        if Instant::now() >= deadline {
            return;
        }
        sleep_until(deadline).await;
    }
}

/// Copy one direction, recording activity, and half-close the writer on EOF.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    activity: &Activity,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut forwarded = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        forwarded += n as u64;
        trace!("{}: {} bytes", direction, n);
    }

    debug!("{}: EOF after {} bytes", direction, forwarded);
    let _ = writer.shutdown().await;
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn session_over_duplex(destination: Option<Destination>) -> (RelaySession, tokio::io::DuplexStream) {
        let (client, server) = duplex(1024);
        let mut connection = Connection::new(1, None);
        if let Some(destination) = destination {
            connection.set_destination(destination);
        }
        let stream: BoxedStream = Box::new(server);
        (RelaySession::new(connection, FrameReader::new(stream)), client)
    }

    #[test]
    fn test_map_connect_error() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, ReplyStatus::ConnectionRefused),
            (io::ErrorKind::TimedOut, ReplyStatus::HostUnreachable),
            (io::ErrorKind::NotFound, ReplyStatus::HostUnreachable),
            (io::ErrorKind::AddrNotAvailable, ReplyStatus::HostUnreachable),
            (io::ErrorKind::HostUnreachable, ReplyStatus::HostUnreachable),
            (io::ErrorKind::NetworkUnreachable, ReplyStatus::NetworkUnreachable),
            (io::ErrorKind::PermissionDenied, ReplyStatus::GeneralFailure),
            (io::ErrorKind::Other, ReplyStatus::GeneralFailure),
        ];
        for (kind, expected) in cases {
            assert_eq!(map_connect_error(&io::Error::from(kind)), expected, "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_failure_status_closes_stream() {
        let (mut session, mut client) = session_over_duplex(None);
        session
            .send_status(ReplyStatus::ConnectionRefused)
            .await
            .unwrap();
        // Second status is ignored
        session.send_status(ReplyStatus::RequestGranted).await.unwrap();
        assert_eq!(session.status_sent(), Some(ReplyStatus::ConnectionRefused));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, protocol::reply(ReplyStatus::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_failure_status_gives_up_the_stream() {
        let (mut session, mut client) = session_over_duplex(None);
        session.send_status(ReplyStatus::GeneralFailure).await.unwrap();
        assert!(session.is_closed());

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, protocol::reply(ReplyStatus::GeneralFailure));

        // Nothing on the server side is left to receive these bytes
        assert!(client.write_all(b"after").await.is_err());

        let err = session.into_parts().err().unwrap();
        assert!(matches!(err, Socks5Error::Relay(_)));
        assert!(err.to_string().contains("GENERAL_FAILURE"));
    }

    #[tokio::test]
    async fn test_granted_status_keeps_the_stream() {
        let (mut session, mut client) = session_over_duplex(None);
        session.send_status(ReplyStatus::RequestGranted).await.unwrap();
        assert!(!session.is_closed());

        client.write_all(b"after").await.unwrap();
        let (_connection, mut stream) = session.into_parts().unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"after");
    }

    #[tokio::test]
    async fn test_unknown_status_name_writes_nothing() {
        let (mut session, mut client) = session_over_duplex(None);
        let err = session.send_status_named("NOT_A_STATUS").await.unwrap_err();
        assert!(err.is_internal());
        assert_eq!(session.status_sent(), None);

        session.send_status_named("TTL_EXPIRED").await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, protocol::reply(ReplyStatus::TtlExpired));
    }

    #[tokio::test]
    async fn test_direct_relay_rejects_non_connect() {
        let (session, mut client) = session_over_duplex(Some(Destination {
            address: "127.0.0.1".into(),
            port: 9,
            command: Command::Udp,
        }));
        DirectRelay::new().relay(session).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, protocol::reply(ReplyStatus::CommandNotSupported));
    }

    #[tokio::test]
    async fn test_direct_relay_refused() {
        // Grab a free port, then close it so the connect is refused
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (session, mut client) = session_over_duplex(Some(Destination {
            address: "127.0.0.1".into(),
            port,
            command: Command::Connect,
        }));
        DirectRelay::new().relay(session).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, protocol::reply(ReplyStatus::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_splice_forwards_both_ways() {
        let (mut client, client_side) = duplex(1024);
        let (target_side, mut target) = duplex(1024);
        let relay = tokio::spawn(splice(client_side, target_side, Duration::ZERO));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        target.write_all(b"pong").await.unwrap();
        drop(target);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"pong");

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_tears_down_target() {
        let (client, client_side) = duplex(1024);
        let (target_side, mut target) = duplex(1024);
        let relay = tokio::spawn(splice(client_side, target_side, Duration::ZERO));

        drop(client);
        relay.await.unwrap();

        let mut received = Vec::new();
        target.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timeout_spares_one_way_download() {
        let (mut client, client_side) = duplex(64 * 1024);
        let (target_side, mut target) = duplex(64 * 1024);
        let relay = tokio::spawn(splice(
            client_side,
            target_side,
            Duration::from_millis(200),
        ));

        // The client never writes; the target keeps streaming for ~1s
        let sender = tokio::spawn(async move {
            for _ in 0..20 {
                target.write_all(&[0xAB; 100]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        sender.await.unwrap();
        assert_eq!(received.len(), 2000);

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_silent_relay() {
        let (mut client, client_side) = duplex(1024);
        let (target_side, mut target) = duplex(1024);
        let relay = tokio::spawn(splice(
            client_side,
            target_side,
            Duration::from_millis(100),
        ));

        tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("idle relay ends")
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        target.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }
}
