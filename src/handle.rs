//! The user-facing connection handle.
//!
//! [`ScpConnection`] is a cheap clone over the command channel into the
//! connection's transport task. All transport state lives on that task;
//! methods here only build commands and await their oneshot results.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::config::ConnectionConfig;
use crate::error::{ConfigError, Error, Result};
use crate::net::UdpSocket;
use crate::runtime::command::Command;
use crate::runtime::event_loop::transport_task;
use crate::runtime::state::ConnState;
use crate::runtime::bulk;
use crate::wire::{CMD_VER, MAX_ARGS};
use crate::{ChipAddr, ScpRequest, ScpResponse, VersionInfo};

/// Capacity of the handle→transport command channel. The transport's own
/// request queue is unbounded; this only bounds the handoff.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// A connection to one SCP endpoint.
///
/// Cloning shares the connection. The transport task exits when
/// [`close`](ScpConnection::close) is called or the last clone is dropped;
/// either way every pending request resolves with [`Error::Cancelled`].
#[derive(Clone, Debug)]
pub struct ScpConnection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    cmd_tx: mpsc::Sender<Command>,
    config: ConnectionConfig,
}

impl ScpConnection {
    /// Connect to a machine using a real tokio UDP socket bound to an
    /// ephemeral local port.
    pub async fn connect(peer: SocketAddr, config: ConnectionConfig) -> Result<Self> {
        Self::connect_with::<tokio::net::UdpSocket>(peer, config).await
    }

    /// Connect using any [`UdpSocket`] implementation, e.g. turmoil's for
    /// simulation testing.
    pub async fn connect_with<U: UdpSocket>(
        peer: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let socket = U::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        Self::from_socket(socket, peer, config)
    }

    /// Build a connection around an already-bound socket.
    pub fn from_socket<U: UdpSocket>(
        socket: U,
        peer: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<Self> {
        if !peer.is_ipv4() {
            return Err(Error::Config(ConfigError::new(
                "SCP peers are IPv4-only",
            )));
        }
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let state = ConnState::new(peer, config.clone());
        tokio::spawn(transport_task(socket, state, cmd_rx));

        Ok(Self {
            inner: Arc::new(ConnectionInner { cmd_tx, config }),
        })
    }

    /// Issue a single SCP command and await its response.
    ///
    /// Admission is FIFO; completion order across concurrent requests is
    /// not guaranteed. The response is delivered even when the machine
    /// reports a failure code — check [`ScpResponse::is_ok`].
    pub async fn send_scp(&self, request: ScpRequest) -> Result<ScpResponse> {
        if request.data.len() > self.inner.config.scp_data_length {
            return Err(Error::Config(ConfigError::new(format!(
                "payload of {} bytes exceeds scp_data_length of {}",
                request.data.len(),
                self.inner.config.scp_data_length
            ))));
        }
        if request.n_args > MAX_ARGS || request.n_args_resp > MAX_ARGS {
            return Err(Error::Config(ConfigError::new(
                "at most three argument words per packet",
            )));
        }

        let (responder, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(Command::SendScp { request, responder })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Read `length` bytes of machine memory at `address` on the given chip
    /// and CPU. Arbitrarily large transfers are segmented and windowed
    /// automatically.
    pub async fn read(
        &self,
        dest: ChipAddr,
        cpu: u8,
        address: u32,
        length: u32,
    ) -> Result<Bytes> {
        bulk::bulk_read(
            &self.inner.cmd_tx,
            self.inner.config.n_outstanding,
            self.inner.config.scp_data_length,
            dest,
            cpu,
            address,
            length,
        )
        .await
    }

    /// Write `data` to machine memory at `address` on the given chip and CPU.
    pub async fn write(
        &self,
        dest: ChipAddr,
        cpu: u8,
        address: u32,
        data: Bytes,
    ) -> Result<()> {
        bulk::bulk_write(
            &self.inner.cmd_tx,
            self.inner.config.n_outstanding,
            self.inner.config.scp_data_length,
            dest,
            cpu,
            address,
            data,
        )
        .await
    }

    /// Query a monitor processor with `CMD_VER` and decode the reply.
    pub async fn version(&self, dest: ChipAddr, cpu: u8) -> Result<VersionInfo> {
        // CMD_VER wants all three argument words present; their values are
        // ignored. The response carries three words and a name string.
        let request = ScpRequest::new(dest, cpu, CMD_VER)
            .with_args(&[0, 0, 0])
            .expect_args(3);
        let response = self.send_scp(request).await?;
        if !response.is_ok() {
            return Err(Error::Remote {
                cmd_rc: response.cmd_rc,
            });
        }

        let x = ((response.arg1 >> 24) & 0xFF) as u8;
        let y = ((response.arg1 >> 16) & 0xFF) as u8;
        let cpu_num = (response.arg1 & 0xFF) as u8;
        let version = f64::from((response.arg2 >> 16) & 0xFFFF) / 100.0;
        let end = response
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(response.data.len());
        let name = String::from_utf8_lossy(&response.data[..end]).into_owned();

        Ok(VersionInfo {
            chip: ChipAddr::new(x, y),
            cpu: cpu_num,
            version,
            name,
        })
    }

    /// Shut the connection down.
    ///
    /// Every queued and in-flight request completes with
    /// [`Error::Cancelled`]. This returns once the shutdown command is
    /// accepted; the endpoint itself closes on the transport task shortly
    /// after, once in-flight work has been accounted for.
    pub async fn close(&self) {
        let _ = self.inner.cmd_tx.send(Command::Shutdown).await;
    }

    /// The connection's configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}
