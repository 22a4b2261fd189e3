use std::net::SocketAddr;

use tokio::net::UdpSocket;
use yastatsd_config::Repeater as RepeaterConfig;

/// Forwards raw datagrams to a fixed set of peers.
///
/// Datagrams are sent unmodified over the listener's socket. Delivery is not confirmed at the
/// UDP layer, so send failures are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Repeater {
    peers: Vec<SocketAddr>,
}

impl Repeater {
    /// Resolves the configured peers once.
    ///
    /// Only addresses of the same family as `local` are reachable from the listener's socket.
    /// Peers that cannot be resolved are logged and skipped.
    pub async fn resolve(configs: &[RepeaterConfig], local: SocketAddr) -> Self {
        let mut peers = Vec::with_capacity(configs.len());

        for config in configs {
            let resolved = match tokio::net::lookup_host((config.host.as_str(), config.port)).await
            {
                Ok(mut addrs) => addrs.find(|addr| addr.is_ipv4() == local.is_ipv4()),
                Err(error) => {
                    yastatsd_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to resolve repeater {config}"
                    );
                    continue;
                }
            };

            match resolved {
                Some(addr) => {
                    yastatsd_log::info!("repeating datagrams to {config} ({addr})");
                    peers.push(addr);
                }
                None => yastatsd_log::warn!("repeater {config} has no address reachable from {local}"),
            }
        }

        Self { peers }
    }

    /// Creates a repeater from resolved addresses.
    pub fn from_addrs(peers: Vec<SocketAddr>) -> Self {
        Self { peers }
    }

    /// Returns the resolved peers.
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Returns `true` if there are no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Sends the datagram to every peer without waiting.
    ///
    /// If the socket's send buffer is full, the copy for that peer is dropped.
    pub fn forward(&self, socket: &UdpSocket, payload: &[u8]) {
        for peer in &self.peers {
            if let Err(error) = socket.try_send_to(payload, *peer) {
                yastatsd_log::trace!(
                    error = &error as &dyn std::error::Error,
                    "failed to repeat datagram to {peer}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use similar_asserts::assert_eq;

    use super::*;

    fn local() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8125))
    }

    #[tokio::test]
    async fn test_resolve_skips_other_family() {
        yastatsd_test::setup();

        let configs = [
            RepeaterConfig {
                host: "127.0.0.1".to_owned(),
                port: 9000,
            },
            RepeaterConfig {
                host: "::1".to_owned(),
                port: 9001,
            },
        ];

        let repeater = Repeater::resolve(&configs, local()).await;
        assert_eq!(repeater.peers(), &["127.0.0.1:9000".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_forward_verbatim() {
        yastatsd_test::setup();

        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let repeater =
            Repeater::from_addrs(vec![first.local_addr().unwrap(), second.local_addr().unwrap()]);
        assert!(!repeater.is_empty());

        let payload = b"a:1|c\nnot a metric\n";
        repeater.forward(&listener, payload);

        let mut buf = [0; 64];
        for peer in [&first, &second] {
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], payload);
            assert_eq!(from, listener.local_addr().unwrap());
        }
    }

    #[tokio::test]
    async fn test_forward_does_not_wait_for_full_buffer() {
        yastatsd_test::setup();

        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // Never reads, so its receive buffer and the sender's buffer fill up.
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let repeater = Repeater::from_addrs(vec![peer.local_addr().unwrap()]);

        let payload = vec![b'x'; 8 * 1024];
        for _ in 0..10_000 {
            repeater.forward(&listener, &payload);
        }

        // Still usable after dropping copies.
        let mut buf = vec![0; 16 * 1024];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, payload.len());
    }
}
