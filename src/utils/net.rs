use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Ranges that may be allowed without asking: RFC1918 plus link-local.
pub const TRUSTED_RANGES: [(Ipv4Addr, u8); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
];

/// One IPv4 address bound to a host interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix: u8,
}

impl InterfaceAddr {
    pub fn cidr(&self) -> Option<Ipv4Network> {
        Ipv4Network::new(self.ip, self.prefix).ok()
    }
}

/// Convert a dotted netmask into a prefix length.
pub fn prefix_of(netmask: Ipv4Addr) -> u8 {
    u32::from(netmask).leading_ones() as u8
}

/// Zero the host bits of `cidr`, keeping its prefix.
pub fn network_of(cidr: Ipv4Network) -> Ipv4Network {
    // prefix already validated by `cidr`, so this cannot fail
    Ipv4Network::new(cidr.network(), cidr.prefix()).unwrap_or(cidr)
}

/// Whether `inner` lies entirely within `outer`.
pub fn is_within(inner: Ipv4Network, outer: Ipv4Network) -> bool {
    inner.prefix() >= outer.prefix() && outer.contains(inner.network())
}

/// Whether the whole of `net` is private (RFC1918) or link-local.
pub fn is_trusted(net: Ipv4Network) -> bool {
    TRUSTED_RANGES.iter().any(|(addr, prefix)| {
        Ipv4Network::new(*addr, *prefix)
            .map(|range| is_within(net, range))
            .unwrap_or(false)
    })
}
