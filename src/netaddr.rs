//! Address classification: which gossiped addresses are worth remembering,
//! and how addresses are grouped for bucket placement.

use std::net::{Ipv4Addr, Ipv6Addr};

use bitcoin::p2p::address::AddrV2;

/// Whether an address is publicly reachable as far as we can tell.
///
/// Loopback, unspecified, private and otherwise reserved ranges are rejected,
/// as are deprecated or unrecognized network identifiers. Gossip carrying such
/// addresses is dropped silently.
pub fn is_routable(addr: &AddrV2) -> bool {
    match addr {
        AddrV2::Ipv4(ipv4) => is_routable_ipv4(ipv4),
        AddrV2::Ipv6(ipv6) => is_routable_ipv6(ipv6),
        AddrV2::TorV3(_) => true,
        AddrV2::I2p(_) => true,
        AddrV2::Cjdns(address) => {
            // CJDNS addresses live in FC00::/8, anything else is junk
            address.octets()[0] == 0xFC
        }
        // OnionV2 was sunset by the Tor project, no point keeping these
        AddrV2::TorV2(_) => false,
        AddrV2::Unknown(_, _) => false,
    }
}

const fn is_routable_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();

    // 0.0.0.0/8 - "This" network
    if octets[0] == 0 {
        return false;
    }

    // Loopback, broadcast, private (RFC 1918)
    if ip.is_loopback() || ip.is_broadcast() || ip.is_private() {
        return false;
    }

    // RFC 2544 - Benchmarking - 198.18.0.0/15
    if octets[0] == 198 && (octets[1] == 18 || octets[1] == 19) {
        return false;
    }

    // RFC 3927 - Link-Local - 169.254.0.0/16
    if ip.is_link_local() {
        return false;
    }

    // RFC 6598 - Shared Address Space (CGNAT) - 100.64.0.0/10
    if octets[0] == 100 && (octets[1] >= 64 && octets[1] <= 127) {
        return false;
    }

    // RFC 5737 - Documentation (TEST-NET-1, TEST-NET-2, TEST-NET-3)
    if ip.is_documentation() {
        return false;
    }

    true
}

const fn is_routable_ipv6(ip: &Ipv6Addr) -> bool {
    let octets = ip.octets();

    // Unspecified, loopback, unique local (RFC 4193 - fc00::/7)
    if ip.is_unspecified() || ip.is_loopback() || ip.is_unique_local() {
        return false;
    }

    // RFC 4843 - ORCHID - 2001:10::/28
    if octets[0] == 0x20 && octets[1] == 0x01 && octets[2] == 0x00 && (octets[3] & 0xF0) == 0x10 {
        return false;
    }

    // RFC 4862 - Link-local - fe80::/64
    if octets[0] == 0xFE && (octets[1] & 0xC0) == 0x80 {
        return false;
    }

    // RFC 7343 - ORCHIDv2 - 2001:20::/28
    if octets[0] == 0x20 && octets[1] == 0x01 && octets[2] == 0x00 && (octets[3] & 0xF0) == 0x20 {
        return false;
    }

    true
}

/// The group an address belongs to for placement purposes.
///
/// Addresses under one operator's control should land in the same group, so
/// that a single operator cannot spread forged addresses across many buckets:
/// /16 for IPv4, /32 for IPv6, and the leading identity bytes for the overlay
/// networks. The leading discriminant keeps groups from colliding across
/// network types.
pub(crate) fn group(addr: &AddrV2) -> Vec<u8> {
    match addr {
        AddrV2::Ipv4(ip) => {
            let octets = ip.octets();
            vec![1, octets[0], octets[1]]
        }
        AddrV2::Ipv6(ip) => {
            let octets = ip.octets();
            vec![2, octets[0], octets[1], octets[2], octets[3]]
        }
        AddrV2::TorV2(id) => vec![3, id[0], id[1], id[2], id[3]],
        AddrV2::TorV3(id) => vec![4, id[0], id[1], id[2], id[3]],
        AddrV2::I2p(id) => vec![5, id[0], id[1], id[2], id[3]],
        AddrV2::Cjdns(ip) => {
            let octets = ip.octets();
            vec![6, octets[0], octets[1]]
        }
        AddrV2::Unknown(network, bytes) => {
            let mut out = vec![7, *network];
            out.extend(bytes.iter().take(4));
            out
        }
    }
}

/// The full identity of an endpoint as fed to the placement hash.
pub(crate) fn hash_key(addr: &AddrV2, port: u16) -> Vec<u8> {
    let mut out = match addr {
        AddrV2::Ipv4(ip) => {
            let mut v = vec![1];
            v.extend(ip.octets());
            v
        }
        AddrV2::Ipv6(ip) => {
            let mut v = vec![2];
            v.extend(ip.octets());
            v
        }
        AddrV2::TorV2(id) => {
            let mut v = vec![3];
            v.extend(id);
            v
        }
        AddrV2::TorV3(id) => {
            let mut v = vec![4];
            v.extend(id);
            v
        }
        AddrV2::I2p(id) => {
            let mut v = vec![5];
            v.extend(id);
            v
        }
        AddrV2::Cjdns(ip) => {
            let mut v = vec![6];
            v.extend(ip.octets());
            v
        }
        AddrV2::Unknown(network, bytes) => {
            let mut v = vec![7, *network];
            v.extend(bytes);
            v
        }
    };
    out.extend(port.to_le_bytes());
    out
}
