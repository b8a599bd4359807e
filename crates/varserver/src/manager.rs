//! High-level entry point for the variable server client.
//!
//! `VarServerManager` validates the configuration, spawns the
//! [`ConnectionKernel`] and hands back a `VarServerInstance` through which the
//! application consumes snapshots and watches the connection state.
//!
//! ```ignore
//! let manager = VarServerManager::from_config(config, subscription)?;
//! let mut instance = manager.start();
//! let mut snapshots = instance.snapshots().expect("taken once");
//! while let Some(snapshot) = snapshots.recv().await {
//!     println!("{:?}", snapshot.get("UTC Seconds (s)"));
//! }
//! instance.shutdown().await?;
//! ```

use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{
    config::Config,
    connection::{ConnectionKernel, Session},
    error::ClientError,
    state::ConnectionState,
    subscription::{Snapshot, Subscription},
};

pub struct VarServerManager {
    config: Config,
    subscription: Arc<Subscription>,
    cancel_token: CancellationToken,
}

impl VarServerManager {
    /// Validates `config` and prepares a manager. Nothing connects until
    /// [`VarServerManager::start`].
    pub fn from_config(config: Config, subscription: Subscription) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            config,
            subscription: Arc::new(subscription),
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn new(
        host: impl Into<String>,
        port: u16,
        subscription: Subscription,
    ) -> Result<Self, ClientError> {
        Self::from_config(Config::new(host, port), subscription)
    }

    /// Spawns the connection kernel on the current tokio runtime.
    pub fn start(self) -> VarServerInstance {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let mut kernel = ConnectionKernel::new(
            self.config.clone(),
            self.subscription.clone(),
            tx,
            self.cancel_token.clone(),
        );
        let state_rx = kernel.subscribe_state();

        let task = tokio::spawn(async move {
            let result = kernel.run().await;
            if let Err(e) = &result {
                error!("Variable server connection kernel exited with error: {e}");
            }
            result
        });
        info!("Variable server client started for {}", self.config.addr());

        VarServerInstance {
            snapshots: Some(rx),
            state_rx,
            cancel_token: self.cancel_token,
            subscription: self.subscription,
            task,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Handle to a running client.
pub struct VarServerInstance {
    snapshots: Option<mpsc::Receiver<Snapshot>>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
    subscription: Arc<Subscription>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl VarServerInstance {
    /// Takes the snapshot receiver. Only the first call returns it.
    pub fn snapshots(&mut self) -> Option<mpsc::Receiver<Snapshot>> {
        self.snapshots.take()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancels the kernel and waits for it to finish.
    ///
    /// Returns the kernel's own result, so a fatal error that already
    /// stopped it surfaces here.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        self.cancel_token.cancel();
        match self.task.await {
            Ok(result) => {
                debug!("Connection kernel joined");
                result
            }
            Err(e) => Err(ClientError::Join(e.to_string())),
        }
    }
}

/// Connects, waits for the first complete snapshot and disconnects.
///
/// Malformed lines before it are skipped. With `read_timeout` unset this
/// waits as long as the server stays silent.
pub async fn fetch_once(config: &Config, subscription: Subscription) -> Result<Snapshot, ClientError> {
    config.validate()?;
    let mut session = Session::open(config, Arc::new(subscription)).await?;
    let result = loop {
        match session.next_snapshot().await {
            Err(ClientError::Protocol(e)) => warn!("Skipping line from variable server: {e}"),
            other => break other,
        }
    };
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::subscription::{Channel, Component};

    fn subscription() -> Subscription {
        Subscription::new(vec![Channel::scalar("UTC Seconds (s)", "Sim.utc")]).unwrap()
    }

    async fn serve_lines(listener: TcpListener, payload: &'static [u8]) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let mut seen = Vec::new();
        while !String::from_utf8_lossy(&seen).contains("var_unpause") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        stream.write_all(payload).await.unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    }

    #[test]
    fn test_manager_rejects_invalid_config() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            VarServerManager::from_config(config, subscription()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_manager_new() {
        let manager = VarServerManager::new("sim-host", 7000, subscription()).unwrap();
        assert_eq!(manager.config().addr(), "sim-host:7000");
        assert_eq!(manager.subscription().width(), 1);
        assert!(!manager.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_instance_streams_and_shuts_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_lines(listener, b"0\t12.5\n"));

        let mut instance = VarServerManager::new("127.0.0.1", port, subscription())
            .unwrap()
            .start();
        let mut rx = instance.snapshots().unwrap();
        assert!(instance.snapshots().is_none());

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(12.5));
        assert!(instance.state().is_connected());

        assert!(instance.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_once_skips_bad_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_lines(listener, b"0\tnan-ish\n0\t42\n"));

        let snapshot = fetch_once(&Config::new("127.0.0.1", port), subscription())
            .await
            .unwrap();
        assert_eq!(snapshot.component("UTC Seconds (s)", Component::N), Some(42.0));
    }
}
