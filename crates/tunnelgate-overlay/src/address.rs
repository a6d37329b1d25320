//! Virtual addresses inside the overlay prefix

use ipnet::IpNet;
use rand::Rng;
use std::net::{IpAddr, Ipv6Addr};

/// Well-known address every agent answers on
pub const AGENT_ADDR: Ipv6Addr = Ipv6Addr::new(
    0xfd7a, 0x115c, 0xa1e0, 0x49d6, 0xb259, 0xb7ac, 0xb1b2, 0x48f4,
);

/// Agent port serving reconnecting PTY sessions
pub const RECONNECTING_PTY_PORT: u16 = 1;

const PREFIX_SEGMENTS: [u16; 3] = [0xfd7a, 0x115c, 0xa1e0];

/// Generate a fresh random address inside `fd7a:115c:a1e0::/48`
pub fn random_address() -> Ipv6Addr {
    let tail: [u16; 5] = rand::thread_rng().gen();
    Ipv6Addr::new(
        PREFIX_SEGMENTS[0],
        PREFIX_SEGMENTS[1],
        PREFIX_SEGMENTS[2],
        tail[0],
        tail[1],
        tail[2],
        tail[3],
        tail[4],
    )
}

/// Whether the address lies inside the overlay prefix
pub fn is_overlay_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => v6.segments()[..3] == PREFIX_SEGMENTS,
        IpAddr::V4(_) => false,
    }
}

/// Single-host prefix (/128 or /32) for an address
pub fn host_prefix(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}
