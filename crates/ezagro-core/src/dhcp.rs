//! Address leases for clients of the provisioning access point
//!
//! Only what a phone needs to reach the portal: DISCOVER gets an OFFER,
//! REQUEST gets an ACK or NAK, RELEASE frees the address. The pool is a
//! handful of addresses after the server's own, handed out per MAC.

use alloc::vec::Vec;

use log::debug;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Lease time announced to clients, in seconds.
pub const LEASE_SECS: u32 = 2 * 60 * 60;

const POOL_SIZE: usize = 8;

const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
/// Fixed BOOTP header plus the cookie
const OPTIONS_OFFSET: usize = 240;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Ack,
    Nak,
    Release,
}

impl MessageType {
    const fn code(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Discover),
            3 => Some(Self::Request),
            7 => Some(Self::Release),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    mac: [u8; 6],
    host: u8,
}

/// Per-MAC leases in the server's /24
#[derive(Debug)]
pub struct LeasePool {
    server: [u8; 4],
    leases: heapless::Vec<Lease, POOL_SIZE>,
    /// Next lease to evict once the pool is full
    evict: usize,
}

struct Parsed<'a> {
    kind: MessageType,
    xid: &'a [u8],
    flags: &'a [u8],
    ciaddr: [u8; 4],
    chaddr: &'a [u8],
    requested: Option<[u8; 4]>,
}

impl LeasePool {
    pub const fn new(server: [u8; 4]) -> Self {
        Self {
            server,
            leases: heapless::Vec::new(),
            evict: 0,
        }
    }

    fn address(&self, host: u8) -> [u8; 4] {
        [self.server[0], self.server[1], self.server[2], host]
    }

    fn lease_for(&mut self, mac: [u8; 6]) -> u8 {
        if let Some(lease) = self.leases.iter().find(|l| l.mac == mac) {
            return lease.host;
        }
        let host = (0..POOL_SIZE as u8)
            .map(|i| self.server[3].wrapping_add(1 + i))
            .find(|host| self.leases.iter().all(|l| l.host != *host));
        match host {
            Some(host) => {
                let _ = self.leases.push(Lease { mac, host });
                host
            }
            None => {
                let slot = self.evict % POOL_SIZE;
                self.evict = self.evict.wrapping_add(1);
                self.leases[slot].mac = mac;
                self.leases[slot].host
            }
        }
    }

    /// Answer one client packet into `out`, `false` when there is nothing to send
    pub fn handle(&mut self, packet: &[u8], out: &mut Vec<u8>) -> bool {
        out.clear();
        let Some(request) = parse(packet) else {
            return false;
        };
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&request.chaddr[..6]);

        let (kind, yiaddr) = match request.kind {
            MessageType::Discover => {
                let host = self.lease_for(mac);
                (MessageType::Offer, self.address(host))
            }
            MessageType::Request => {
                let host = self.lease_for(mac);
                let leased = self.address(host);
                let asked = request
                    .requested
                    .or(Some(request.ciaddr).filter(|ip| *ip != [0; 4]));
                match asked {
                    Some(ip) if ip != leased => (MessageType::Nak, [0; 4]),
                    _ => (MessageType::Ack, leased),
                }
            }
            MessageType::Release => {
                self.leases.retain(|lease| lease.mac != mac);
                debug!("DHCP release from {:02x?}", mac);
                return false;
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => return false,
        };
        debug!("DHCP {:?} {:?} for {:02x?}", kind, yiaddr, mac);

        out.extend_from_slice(&[OP_REPLY, HTYPE_ETHERNET, 6, 0]);
        out.extend_from_slice(request.xid);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(request.flags);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&yiaddr);
        out.extend_from_slice(&self.server);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(request.chaddr);
        out.resize(236, 0);
        out.extend_from_slice(&MAGIC_COOKIE);

        out.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, kind.code()]);
        out.extend_from_slice(&[OPT_SERVER_ID, 4]);
        out.extend_from_slice(&self.server);
        if kind != MessageType::Nak {
            out.extend_from_slice(&[OPT_LEASE_TIME, 4]);
            out.extend_from_slice(&LEASE_SECS.to_be_bytes());
            out.extend_from_slice(&[OPT_SUBNET_MASK, 4, 255, 255, 255, 0]);
            out.extend_from_slice(&[OPT_ROUTER, 4]);
            out.extend_from_slice(&self.server);
        }
        out.push(OPT_END);
        true
    }
}

fn parse(packet: &[u8]) -> Option<Parsed<'_>> {
    if packet.len() < OPTIONS_OFFSET
        || packet[0] != OP_REQUEST
        || packet[1] != HTYPE_ETHERNET
        || packet[2] != 6
        || packet[236..240] != MAGIC_COOKIE
    {
        return None;
    }

    let mut kind = None;
    let mut requested = None;
    let mut options = &packet[OPTIONS_OFFSET..];
    while let [code, rest @ ..] = options {
        match *code {
            OPT_END => break,
            OPT_PAD => {
                options = rest;
                continue;
            }
            _ => {}
        }
        let (&len, rest) = rest.split_first()?;
        let value = rest.get(..usize::from(len))?;
        match (*code, value) {
            (OPT_MESSAGE_TYPE, [code]) => kind = MessageType::from_code(*code),
            (OPT_REQUESTED_IP, [a, b, c, d]) => requested = Some([*a, *b, *c, *d]),
            _ => {}
        }
        options = &rest[usize::from(len)..];
    }

    Some(Parsed {
        kind: kind?,
        xid: &packet[4..8],
        flags: &packet[10..12],
        ciaddr: [packet[12], packet[13], packet[14], packet[15]],
        chaddr: &packet[28..44],
        requested,
    })
}
