//! Turmoil socket implementation for testing.
//! Enabled automatically during tests or with the `turmoil` feature.

use super::UdpSocket;
use std::io;
use std::net::SocketAddr;

impl UdpSocket for turmoil::net::UdpSocket {
    async fn bind(addr: SocketAddr) -> io::Result<Self> {
        turmoil::net::UdpSocket::bind(addr).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        turmoil::net::UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        turmoil::net::UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        turmoil::net::UdpSocket::local_addr(self)
    }
}
