//! DHCP leases on the provisioning access point

use alloc::vec::Vec;

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Stack};
use log::{info, warn};

use ezagro_core::dhcp::{CLIENT_PORT, LeasePool, SERVER_PORT};

const PACKET_MAX: usize = 576;

/// Answer DHCP clients on `stack` forever, handing out addresses next to `server`
pub async fn serve_leases(stack: Stack<'static>, server: Ipv4Address) -> ! {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx = [0u8; 2 * PACKET_MAX];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx = [0u8; 2 * PACKET_MAX];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx, &mut tx_meta, &mut tx);
    if let Err(e) = socket.bind(SERVER_PORT) {
        warn!("DHCP bind failed: {:?}", e);
        core::future::pending::<()>().await;
    }
    info!("Serving DHCP on {}", server);

    let mut pool = LeasePool::new(server.octets());
    let mut packet = [0u8; PACKET_MAX];
    let mut reply = Vec::with_capacity(PACKET_MAX);
    // Clients have no address yet, so replies go to the broadcast address
    let clients = IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::BROADCAST), CLIENT_PORT);
    loop {
        let n = match socket.recv_from(&mut packet).await {
            Ok((n, _)) => n,
            Err(e) => {
                warn!("DHCP receive failed: {:?}", e);
                continue;
            }
        };
        if pool.handle(&packet[..n], &mut reply) {
            if let Err(e) = socket.send_to(&reply, clients).await {
                warn!("DHCP reply failed: {:?}", e);
            }
        }
    }
}
