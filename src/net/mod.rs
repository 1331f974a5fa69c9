//! # Network Abstraction Layer
//!
//! A trait abstracting over async UDP sockets, so the transport engine can
//! run against different implementations:
//!
//! - **Production**: `tokio::net::UdpSocket` for real network communication
//! - **Testing**: [turmoil](https://docs.rs/turmoil) sockets for
//!   deterministic, fast network simulation, or an in-memory mock with
//!   scripted loss and reordering
//!
//! User code typically doesn't interact with this trait directly;
//! [`ScpConnection::connect`](crate::ScpConnection::connect) picks the tokio
//! implementation. Use
//! [`ScpConnection::connect_with`](crate::ScpConnection::connect_with) or
//! [`ScpConnection::from_socket`](crate::ScpConnection::from_socket) to
//! supply another one.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

mod tokio_impl;

#[cfg(feature = "turmoil")]
mod turmoil_impl;

/// Async UDP socket abstraction.
pub trait UdpSocket: Send + Sync + Sized + 'static {
    /// Bind to the given address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Send a datagram to the given address.
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive a datagram and the source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Get the local address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
