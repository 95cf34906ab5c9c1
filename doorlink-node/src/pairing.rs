//! Pairing broadcast - a UDP hint asking the controller to re-enter provisioning mode

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use doorlink_proto::PAIRING_TOKEN;
use tokio::net::UdpSocket;

/// Limited broadcast, reaches the local subnet
pub const BROADCAST_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::BROADCAST);

/// Fire-and-forget; returns whether the datagram left this host
///
/// Failures are logged and swallowed: there is no reply to wait for.
pub async fn request_pairing(target: SocketAddr) -> bool {
    match send(target).await {
        Ok(()) => {
            tracing::info!(%target, "pairing mode requested");
            true
        }
        Err(e) => {
            tracing::warn!(%target, error = %e, "pairing broadcast failed");
            false
        }
    }
}

async fn send(target: SocketAddr) -> std::io::Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(PAIRING_TOKEN, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_pairing_token() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        assert!(request_pairing(target).await);

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PAIRING_MODE_REQUEST");
    }
}
