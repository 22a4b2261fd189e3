use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Sleep;

/// Maximum time to transmit a single flush before the connection is considered lost.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes outbound connections for a [`Transport`].
pub trait Connect: Send + Sync + 'static {
    /// The connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Starts a new connection attempt.
    fn connect(&self) -> BoxFuture<'static, io::Result<Self::Stream>>;

    /// The remote address for logs.
    fn addr(&self) -> &str;
}

/// Connects to a `host:port` address over TCP.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Creates a connector for the given `host:port` address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connect for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> BoxFuture<'static, io::Result<TcpStream>> {
        let addr = self.addr.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

/// An error returned by [`Transport::send`].
#[derive(Debug, thiserror::Error)]
pub enum SinkTransportError {
    /// There is no established connection.
    #[error("not connected")]
    NotConnected,
    /// The connection failed while sending.
    #[error("connection lost")]
    Io(#[from] io::Error),
}

/// The connection status of a [`Transport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportStatus {
    /// Waiting for the retry interval to elapse.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The connection is established.
    Connected,
}

enum State<S> {
    Disconnected(Pin<Box<Sleep>>),
    Connecting(BoxFuture<'static, io::Result<S>>),
    Connected(S),
}

impl<S> State<S> {
    fn status(&self) -> TransportStatus {
        match self {
            Self::Disconnected(_) => TransportStatus::Disconnected,
            Self::Connecting(_) => TransportStatus::Connecting,
            Self::Connected(_) => TransportStatus::Connected,
        }
    }
}

/// A persistent outbound connection that reconnects after a fixed interval.
///
/// The transport is a state machine:
///
/// ```text
///   Disconnected ──(retry interval)──► Connecting ──(success)──► Connected
///        ▲                                 │                         │
///        └─────────────(failure)───────────┴──────(I/O error)────────┘
/// ```
///
/// Transitions are performed by [`drive`](Self::drive) and [`send`](Self::send). There is no
/// retry limit and no backoff.
pub struct Transport<C: Connect> {
    connector: C,
    retry_interval: Duration,
    state: State<C::Stream>,
}

impl<C: Connect> Transport<C> {
    /// Creates a transport and immediately starts connecting.
    pub fn new(connector: C, retry_interval: Duration) -> Self {
        yastatsd_log::debug!("connecting to {}", connector.addr());
        let state = State::Connecting(connector.connect());

        Self {
            connector,
            retry_interval,
            state,
        }
    }

    /// Returns the current connection status.
    pub fn status(&self) -> TransportStatus {
        self.state.status()
    }

    /// Returns `true` if the connection is established.
    pub fn is_connected(&self) -> bool {
        self.status() == TransportStatus::Connected
    }

    /// Waits for and performs the next state transition.
    ///
    /// While connected, this watches the connection for EOF or errors. Data sent by the remote
    /// is discarded.
    ///
    /// This method is cancel safe.
    pub async fn drive(&mut self) {
        match &mut self.state {
            State::Disconnected(sleep) => {
                sleep.as_mut().await;
                yastatsd_log::debug!("connecting to {}", self.connector.addr());
                self.state = State::Connecting(self.connector.connect());
            }
            State::Connecting(connect) => match connect.await {
                Ok(stream) => {
                    yastatsd_log::info!("connected to {}", self.connector.addr());
                    self.state = State::Connected(stream);
                }
                Err(error) => {
                    yastatsd_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "connection to {} failed, retrying in {:?}",
                        self.connector.addr(),
                        self.retry_interval,
                    );
                    self.disconnect();
                }
            },
            State::Connected(stream) => {
                let mut buf = [0; 1024];
                match stream.read(&mut buf).await {
                    Ok(0) => {
                        yastatsd_log::warn!(
                            "connection to {} closed, retrying in {:?}",
                            self.connector.addr(),
                            self.retry_interval,
                        );
                        self.disconnect();
                    }
                    Ok(_) => (),
                    Err(error) => self.connection_lost(&error),
                }
            }
        }
    }

    /// Writes the payload to the connection.
    ///
    /// Fails immediately if there is no established connection. On write errors, the connection
    /// is closed and a reconnect is scheduled.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), SinkTransportError> {
        let State::Connected(stream) = &mut self.state else {
            return Err(SinkTransportError::NotConnected);
        };

        let result = tokio::time::timeout(SEND_TIMEOUT, async {
            stream.write_all(payload).await?;
            stream.flush().await
        })
        .await
        .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()));

        if let Err(error) = result {
            self.connection_lost(&error);
            return Err(error.into());
        }

        Ok(())
    }

    fn connection_lost(&mut self, error: &io::Error) {
        yastatsd_log::warn!(
            error = error as &dyn std::error::Error,
            "connection to {} lost, retrying in {:?}",
            self.connector.addr(),
            self.retry_interval,
        );
        self.disconnect();
    }

    fn disconnect(&mut self) {
        self.state = State::Disconnected(Box::pin(tokio::time::sleep(self.retry_interval)));
    }
}

impl<C: Connect> fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("addr", &self.connector.addr())
            .field("retry_interval", &self.retry_interval)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    use super::*;

    /// Hands out prepared in-memory streams and failures in order.
    pub struct FakeConnector {
        attempts: Mutex<VecDeque<io::Result<DuplexStream>>>,
    }

    impl FakeConnector {
        pub fn new(attempts: impl IntoIterator<Item = io::Result<DuplexStream>>) -> Self {
            Self {
                attempts: Mutex::new(attempts.into_iter().collect()),
            }
        }
    }

    impl Connect for FakeConnector {
        type Stream = DuplexStream;

        fn connect(&self) -> BoxFuture<'static, io::Result<DuplexStream>> {
            let attempt = self
                .attempts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(io::ErrorKind::ConnectionRefused.into()));
            Box::pin(async move { attempt })
        }

        fn addr(&self) -> &str {
            "graphite.test:2003"
        }
    }

    fn refused() -> io::Result<DuplexStream> {
        Err(io::ErrorKind::ConnectionRefused.into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_immediately() {
        yastatsd_test::setup();

        let (client, mut server) = tokio::io::duplex(1024);
        let mut transport = Transport::new(FakeConnector::new([Ok(client)]), Duration::from_secs(5));
        assert_eq!(transport.status(), TransportStatus::Connecting);

        transport.drive().await;
        assert!(transport.is_connected());

        transport.send(b"a 1.0 10\n").await.unwrap();

        let mut buf = [0; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a 1.0 10\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_interval() {
        yastatsd_test::setup();

        let (client, _server) = tokio::io::duplex(1024);
        let connector = FakeConnector::new([refused(), refused(), Ok(client)]);
        let mut transport = Transport::new(connector, Duration::from_secs(5));

        let start = Instant::now();

        transport.drive().await;
        assert_eq!(transport.status(), TransportStatus::Disconnected);
        assert!(matches!(
            transport.send(b"dropped").await,
            Err(SinkTransportError::NotConnected)
        ));

        transport.drive().await;
        assert_eq!(transport.status(), TransportStatus::Connecting);
        assert!(start.elapsed() >= Duration::from_secs(5));

        transport.drive().await;
        transport.drive().await;
        transport.drive().await;
        assert!(transport.is_connected());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_eof() {
        yastatsd_test::setup();

        let (first, first_server) = tokio::io::duplex(1024);
        let (second, mut second_server) = tokio::io::duplex(1024);
        let connector = FakeConnector::new([Ok(first), Ok(second)]);
        let mut transport = Transport::new(connector, Duration::from_secs(1));

        transport.drive().await;
        assert!(transport.is_connected());

        drop(first_server);
        transport.drive().await;
        assert_eq!(transport.status(), TransportStatus::Disconnected);

        transport.drive().await;
        transport.drive().await;
        assert!(transport.is_connected());

        transport.send(b"b 2.0 20\n").await.unwrap();
        let mut buf = [0; 9];
        second_server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"b 2.0 20\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_disconnects() {
        yastatsd_test::setup();

        let (client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::new(FakeConnector::new([Ok(client)]), Duration::from_secs(1));

        transport.drive().await;
        drop(server);

        let result = transport.send(b"c 3.0 30\n").await;
        assert!(matches!(result, Err(SinkTransportError::Io(_))));
        assert_eq!(transport.status(), TransportStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_is_cancel_safe() {
        yastatsd_test::setup();

        let (client, _server) = tokio::io::duplex(1024);
        let connector = FakeConnector::new([refused(), Ok(client)]);
        let mut transport = Transport::new(connector, Duration::from_secs(5));
        transport.drive().await;

        let start = Instant::now();

        // Interrupting the retry timer does not restart it.
        for _ in 0..4 {
            let interrupted = tokio::time::timeout(Duration::from_secs(1), transport.drive()).await;
            assert!(interrupted.is_err());
        }
        transport.drive().await;
        assert_eq!(transport.status(), TransportStatus::Connecting);
        assert!(start.elapsed() < Duration::from_secs(6));
    }
}
