//! Wrapper for the tokio [`UdpSocket`][`tokio::net::UdpSocket`] the DHT
//! engine is bound to.
use std::fmt::Debug;
use std::net::SocketAddr;
use std::ops::Deref;

use super::DHT_LOG_TARGET;

pub struct BoundSocket {
    socket: tokio::net::UdpSocket,
}

impl BoundSocket {
    /// # Errors
    ///
    /// Will return an error if the socket can't be bound to the provided
    /// address.
    pub async fn new(addr: SocketAddr) -> Result<Self, Box<std::io::Error>> {
        let bind_addr = format!("udp://{addr}");
        tracing::debug!(target: DHT_LOG_TARGET, bind_addr, "BoundSocket::new (binding)");

        let socket = tokio::net::UdpSocket::bind(addr).await;

        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => Err(e)?,
        };

        tracing::debug!(target: DHT_LOG_TARGET, bind_addr, "BoundSocket::new (bound)");

        Ok(Self { socket })
    }

    /// # Panics
    ///
    /// Will panic if the socket can't get the address it was bound to.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.socket.local_addr().expect("it should get the local address")
    }
}

impl Deref for BoundSocket {
    type Target = tokio::net::UdpSocket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl Debug for BoundSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let local_addr = match self.socket.local_addr() {
            Ok(addr) => format!("Receiving From: {addr}"),
            Err(err) => format!("Socket Broken: {err}"),
        };

        f.debug_struct("BoundSocket").field("addr", &local_addr).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::BoundSocket;

    #[tokio::test]
    async fn it_should_bind_to_an_ephemeral_port() {
        let socket = BoundSocket::new("127.0.0.1:0".parse().unwrap()).await.unwrap();

        assert_ne!(socket.address().port(), 0);
    }

    #[tokio::test]
    async fn it_should_fail_to_bind_to_an_address_that_is_not_local() {
        // TEST-NET-1 is never routable locally
        let result = BoundSocket::new("192.0.2.1:0".parse().unwrap()).await;

        assert!(result.is_err());
    }
}
