//! Variable server sessions and the reconnecting connection kernel.
//!
//! - `Session`: one TCP connection. Opens the socket, sends the subscription
//!   commands and turns incoming lines into snapshots.
//! - `ConnectionKernel`: the long-running loop around it. Any failure closes
//!   the session, waits the retry delay and opens a fresh one, broadcasting
//!   every transition on a watch channel.
//!
//! ```text
//! Monitor <- mpsc<Snapshot> <- ConnectionKernel <- Session <- TCP <- variable server
//!                                     |
//!                                     +-> watch<ConnectionState>
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    backoff::Backoff,
    config::Config,
    error::{root_message, ClientError, ProtocolError},
    protocol::{self, Frame},
    state::ConnectionState,
    subscription::{Snapshot, Subscription},
};

/// Longest line accepted from the server, terminator included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A live, subscribed connection to the variable server.
pub struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    subscription: Arc<Subscription>,
    read_timeout: Option<Duration>,
    peer: SocketAddr,
    line: Vec<u8>,
}

impl Session {
    /// Connects and sends the subscribe script.
    ///
    /// # Errors
    /// - `ClientError::Resolve` when the host has no address
    /// - `ClientError::ConnectTimeout` when connect exceeds `connection_timeout`
    /// - `ClientError::Io` for refused connections and write failures
    pub async fn open(config: &Config, subscription: Arc<Subscription>) -> Result<Self, ClientError> {
        let addr = config.addr();
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| ClientError::Resolve {
                addr: addr.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if candidates.is_empty() {
            return Err(ClientError::Resolve {
                addr,
                reason: "no addresses returned".into(),
            });
        }

        debug!("Connecting to variable server at {addr}");
        let stream = tokio::time::timeout(
            config.connection_timeout(),
            TcpStream::connect(&candidates[..]),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout {
            addr: addr.clone(),
            seconds: config.connection_timeout,
        })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (read_half, mut writer) = stream.into_split();
        let script = protocol::subscribe_script(&subscription.variables(), config.cycle_period);
        writer.write_all(protocol::encode(&script).as_bytes()).await?;
        writer.flush().await?;
        debug!(
            "Subscribed to {} variables on {peer}",
            subscription.variables().len()
        );

        Ok(Session {
            reader: BufReader::new(read_half),
            writer,
            subscription,
            read_timeout: config.read_timeout(),
            peer,
            line: Vec::new(),
        })
    }

    /// Reads the next line and decodes it.
    ///
    /// A malformed, non-UTF-8 or overlong line comes back as
    /// `ClientError::Protocol`; the session is still usable afterwards.
    pub async fn next_snapshot(&mut self) -> Result<Snapshot, ClientError> {
        let n = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_line())
                .await
                .map_err(|_| ClientError::Stale(limit.as_secs_f64()))??,
            None => self.read_line().await?,
        };
        if n == 0 {
            return Err(ClientError::Closed);
        }

        let line = std::str::from_utf8(&self.line).map_err(|_| ProtocolError::InvalidUtf8)?;
        trace!("Line from {}: {:?}", self.peer, line);
        let frame = Frame::parse(line)?;
        Ok(self.subscription.decode(&frame)?)
    }

    /// Fills `self.line` with at most `MAX_LINE_BYTES`. An overlong line is
    /// drained up to its terminator and reported as `LineTooLong`.
    async fn read_line(&mut self) -> Result<usize, ClientError> {
        self.line.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut self.line)
            .await?;
        if n < MAX_LINE_BYTES || self.line.ends_with(b"\n") {
            return Ok(n);
        }

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                break;
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.reader.consume(end + 1);
                    break;
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
        Err(ProtocolError::LineTooLong {
            limit: MAX_LINE_BYTES,
        }
        .into())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends the teardown script and shuts the socket down.
    ///
    /// Best effort: the peer may already be gone.
    pub async fn close(mut self) {
        let teardown = protocol::encode(&protocol::teardown_script());
        if let Err(e) = self.writer.write_all(teardown.as_bytes()).await {
            debug!("Teardown to {} not delivered: {e}", self.peer);
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("Socket shutdown for {} failed: {e}", self.peer);
        }
    }
}

/// How a streaming session ended.
enum StreamEnd {
    Shutdown,
    ReceiverGone,
    Failed(ClientError),
}

/// Keeps a session alive for as long as the application runs.
pub struct ConnectionKernel {
    config: Config,
    subscription: Arc<Subscription>,
    backoff: Backoff,
    cancel: CancellationToken,
    snapshots: mpsc::Sender<Snapshot>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        config: Config,
        subscription: Arc<Subscription>,
        snapshots: mpsc::Sender<Snapshot>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let backoff = config.backoff();
        Self {
            config,
            subscription,
            backoff,
            cancel,
            snapshots,
            state_tx,
            state_rx,
        }
    }

    /// Receiver that sees every state transition, starting from the current one.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = *self.state_tx.borrow() != state;
        if changed {
            info!("Connection state changed to: {state}");
            // state_rx is held by the kernel, so send cannot fail here
            let _ = self.state_tx.send(state);
        }
    }

    /// Runs until cancelled, the snapshot receiver is dropped, or a fatal
    /// error occurs.
    ///
    /// # Returns
    /// - `Ok(())` on cancellation or when nobody consumes snapshots anymore
    /// - `Err(ClientError)` on a fatal error or when the retry limit is hit
    pub async fn run(&mut self) -> Result<(), ClientError> {
        self.backoff.reset();
        info!(
            "Starting variable server client for {} ({} variables)",
            self.config.addr(),
            self.subscription.width()
        );

        loop {
            self.update_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = Session::open(&self.config, self.subscription.clone()) => Some(result),
            };

            let failure = match opened {
                None => {
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }
                Some(Ok(session)) => {
                    info!("Connected to variable server at {}", session.peer());
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                    match self.stream(session).await {
                        StreamEnd::Shutdown => {
                            self.update_state(ConnectionState::Disconnected("shutdown".into()));
                            info!("Connection kernel shutdown completed");
                            return Ok(());
                        }
                        StreamEnd::ReceiverGone => {
                            info!("Snapshot receiver dropped, stopping connection kernel");
                            self.update_state(ConnectionState::Disconnected(
                                ClientError::ChannelClosed.to_string(),
                            ));
                            return Ok(());
                        }
                        StreamEnd::Failed(e) => e,
                    }
                }
                Some(Err(e)) if e.is_fatal() => {
                    error!("Fatal error, stopping connection kernel: {e}");
                    self.update_state(ConnectionState::Disconnected(e.to_string()));
                    return Err(e);
                }
                Some(Err(e)) => e,
            };

            self.update_state(ConnectionState::Disconnected(failure.to_string()));

            let delay = match self.backoff.next_sleep() {
                Ok(delay) => delay,
                Err(e) => {
                    error!("Giving up on {}: {e}", self.config.addr());
                    self.update_state(ConnectionState::Disconnected(e.to_string()));
                    return Err(e.into());
                }
            };
            warn!(
                "Reconnecting in {:.2} seconds due to error: {}",
                delay.as_secs_f64(),
                root_message(&failure)
            );
            self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream(&self, mut session: Session) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = session.next_snapshot() => Some(result),
            };

            let snapshot = match next {
                None => {
                    info!("Shutdown signal received, closing variable server session");
                    session.close().await;
                    return StreamEnd::Shutdown;
                }
                Some(Ok(snapshot)) => snapshot,
                Some(Err(ClientError::Protocol(e))) => {
                    warn!("Skipping line from variable server: {e}");
                    continue;
                }
                Some(Err(e)) => {
                    session.close().await;
                    return StreamEnd::Failed(e);
                }
            };

            let delivered = tokio::select! {
                _ = self.cancel.cancelled() => None,
                sent = self.snapshots.send(snapshot) => Some(sent.is_ok()),
            };
            match delivered {
                None => {
                    session.close().await;
                    return StreamEnd::Shutdown;
                }
                Some(false) => {
                    session.close().await;
                    return StreamEnd::ReceiverGone;
                }
                Some(true) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tracing_test::traced_test;

    use super::*;
    use crate::subscription::{Channel, Component};

    fn subscription() -> Arc<Subscription> {
        Arc::new(
            Subscription::new(vec![
                Channel::vector("Position (m)", "Sim.r"),
                Channel::scalar("UTC Seconds (s)", "Sim.utc"),
            ])
            .unwrap(),
        )
    }

    fn config_for(port: u16) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port,
            connection_timeout: 2,
            reconnect_delay_ms: 50,
            max_reconnect_delay_ms: 50,
            ..Default::default()
        }
    }

    const UNPAUSE: &str = "trick.var_unpause()\n";

    /// Reads until the unpause command arrives. Returns the script and any
    /// bytes that followed it in the same reads.
    async fn read_script(stream: &mut TcpStream) -> (String, String) {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let text = String::from_utf8_lossy(&received);
            if let Some(at) = text.find(UNPAUSE) {
                let (script, rest) = text.split_at(at + UNPAUSE.len());
                return (script.to_string(), rest.to_string());
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before finishing the script");
            received.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_session_subscribes_and_decodes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (script, _) = read_script(&mut stream).await;
            stream.write_all(b"0\t1\t2\t3\t99.5\n").await.unwrap();
            script
        });

        let mut session = Session::open(&config_for(port), subscription()).await.unwrap();
        let snapshot = session.next_snapshot().await.unwrap();
        assert_eq!(snapshot.component("Position (m)", Component::Z), Some(3.0));
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(99.5));

        let script = server.await.unwrap();
        assert_eq!(
            script,
            "trick.var_pause()\ntrick.var_clear()\ntrick.var_add(\"Sim.r[0]\")\n\
             trick.var_add(\"Sim.r[1]\")\ntrick.var_add(\"Sim.r[2]\")\n\
             trick.var_add(\"Sim.utc\")\ntrick.var_unpause()\n"
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_session_skippable_protocol_error_then_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            stream.write_all(b"0\t1\t2\n0\t1\t2\t3\t4\n").await.unwrap();
        });

        let mut session = Session::open(&config_for(port), subscription()).await.unwrap();
        assert!(matches!(
            session.next_snapshot().await,
            Err(ClientError::Protocol(_))
        ));
        assert!(session.next_snapshot().await.is_ok());
        assert!(matches!(
            session.next_snapshot().await,
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_session_read_timeout_is_stale() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = Config {
            read_timeout: Some(1),
            ..config_for(port)
        };
        let mut session = Session::open(&config, subscription()).await.unwrap();
        assert!(matches!(
            session.next_snapshot().await,
            Err(ClientError::Stale(_))
        ));
    }

    #[tokio::test]
    async fn test_session_close_sends_teardown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (_, mut rest) = read_script(&mut stream).await;
            stream.read_to_string(&mut rest).await.unwrap();
            rest
        });

        let session = Session::open(&config_for(port), subscription()).await.unwrap();
        session.close().await;
        assert_eq!(
            server.await.unwrap(),
            "trick.var_pause()\ntrick.var_clear()\n"
        );
    }

    #[tokio::test]
    async fn test_session_skips_non_utf8_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            stream
                .write_all(b"0\t\xff\xfe\n0\t1\t2\t3\t42\n")
                .await
                .unwrap();
        });

        let mut session = Session::open(&config_for(port), subscription()).await.unwrap();
        assert!(matches!(
            session.next_snapshot().await,
            Err(ClientError::Protocol(ProtocolError::InvalidUtf8))
        ));
        let snapshot = session.next_snapshot().await.unwrap();
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(42.0));
    }

    #[tokio::test]
    async fn test_session_discards_overlong_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            let mut junk = vec![b'7'; MAX_LINE_BYTES + 4096];
            junk.push(b'\n');
            stream.write_all(&junk).await.unwrap();
            stream.write_all(b"0\t1\t2\t3\t5\n").await.unwrap();
        });

        let mut session = Session::open(&config_for(port), subscription()).await.unwrap();
        assert!(matches!(
            session.next_snapshot().await,
            Err(ClientError::Protocol(ProtocolError::LineTooLong { .. }))
        ));
        let snapshot = session.next_snapshot().await.unwrap();
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(5.0));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_kernel_reconnects_after_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            for t in [1.0, 2.0] {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_script(&mut stream).await;
                let line = format!("0\t1\t2\t3\t{t}\n");
                stream.write_all(line.as_bytes()).await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut kernel = ConnectionKernel::new(config_for(port), subscription(), tx, cancel.clone());
        let mut state_rx = kernel.subscribe_state();
        let handle = tokio::spawn(async move { kernel.run().await });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.component("UTC Seconds (s)", Component::N), Some(1.0));
        assert_eq!(second.component("UTC Seconds (s)", Component::N), Some(2.0));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(
            *state_rx.borrow_and_update(),
            ConnectionState::Disconnected("shutdown".into())
        );
        assert!(logs_contain("Reconnecting in"));
    }

    #[tokio::test]
    async fn test_kernel_skips_bad_lines_without_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            stream
                .write_all(b"0\t1\n0\tx\t2\t3\t4\n0\t\xff\xfe\n0\t1\t2\t3\t7\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut kernel = ConnectionKernel::new(config_for(port), subscription(), tx, cancel.clone());
        let state_rx = kernel.subscribe_state();
        let handle = tokio::spawn(async move { kernel.run().await });

        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(7.0));
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_kernel_gives_up_after_attempt_limit() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let config = Config {
            max_reconnect_attempts: 2,
            ..config_for(port)
        };
        let (tx, _rx) = mpsc::channel(8);
        let mut kernel = ConnectionKernel::new(config, subscription(), tx, CancellationToken::new());
        let state_rx = kernel.subscribe_state();

        let result = kernel.run().await;
        assert!(matches!(result, Err(ClientError::RetriesPolicy(_))));
        assert!(matches!(
            *state_rx.borrow(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_kernel_stops_when_receiver_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_script(&mut stream).await;
            let _ = stream.write_all(b"0\t1\t2\t3\t4\n").await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut kernel = ConnectionKernel::new(config_for(port), subscription(), tx, CancellationToken::new());
        assert!(kernel.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_kernel_cancel_while_waiting() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = Config {
            reconnect_delay_ms: 60_000,
            max_reconnect_delay_ms: 60_000,
            ..config_for(port)
        };

        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut kernel = ConnectionKernel::new(config, subscription(), tx, cancel.clone());
        let mut state_rx = kernel.subscribe_state();
        let handle = tokio::spawn(async move { kernel.run().await });

        state_rx
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting(_)))
            .await
            .unwrap();
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_fatal() {
        let config = Config {
            host: "host.invalid".into(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(8);
        let mut kernel = ConnectionKernel::new(config, subscription(), tx, CancellationToken::new());
        assert!(matches!(
            kernel.run().await,
            Err(ClientError::Resolve { .. })
        ));
    }
}
