// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// An IP protocol value.
#[repr(u8)]
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum Protocol {
    ICMP,
    IGMP,
    TCP,
    UDP,
    Unknown(u8),
}

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_IGMP: u8 = 0x2;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;

impl Default for Protocol {
    fn default() -> Self {
        Self::Unknown(255)
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ICMP => write!(f, "ICMP"),
            Self::IGMP => write!(f, "IGMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self::Unknown(p) => write!(f, "Unknown({p})"),
        }
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            PROTO_ICMP => Self::ICMP,
            PROTO_IGMP => Self::IGMP,
            PROTO_TCP => Self::TCP,
            PROTO_UDP => Self::UDP,
            _ => Self::Unknown(proto),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => PROTO_ICMP,
            Protocol::IGMP => PROTO_IGMP,
            Protocol::TCP => PROTO_TCP,
            Protocol::UDP => PROTO_UDP,
            Protocol::Unknown(v) => v,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        match val.to_ascii_lowercase().as_str() {
            "icmp" => Ok(Self::ICMP),
            "igmp" => Ok(Self::IGMP),
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            other => other
                .parse::<u8>()
                .map(Self::from)
                .map_err(|_| format!("bad protocol: {val}")),
        }
    }
}

impl From<smoltcp::wire::IpProtocol> for Protocol {
    fn from(proto: smoltcp::wire::IpProtocol) -> Self {
        Self::from(u8::from(proto))
    }
}

impl From<Protocol> for smoltcp::wire::IpProtocol {
    fn from(proto: Protocol) -> smoltcp::wire::IpProtocol {
        use smoltcp::wire::IpProtocol::*;
        match proto {
            Protocol::ICMP => Icmp,
            Protocol::IGMP => Igmp,
            Protocol::TCP => Tcp,
            Protocol::UDP => Udp,
            Protocol::Unknown(proto) => Unknown(proto),
        }
    }
}

/// An IPv4 address.
///
/// The address is held as its four wire octets, so it is always in
/// network order no matter the host byte order.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(C)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };
    pub const LOCAL_BCAST: Self = Self { inner: [255; 4] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }

    /// Return the address after applying the network mask.
    pub fn mask(mut self, mask: u8) -> Result<Self, String> {
        if mask > 32 {
            return Err(format!("bad mask: {mask}"));
        }

        if mask == 0 {
            return Ok(Ipv4Addr::ANY_ADDR);
        }

        let mut n = u32::from_be_bytes(self.inner);

        let mut bits = i32::MIN;
        bits >>= mask - 1;
        n &= bits as u32;
        self.inner = n.to_be_bytes();
        Ok(self)
    }

    /// Apply an already validated prefix length.
    pub fn safe_mask(self, prefix_len: Ipv4PrefixLen) -> Self {
        let n = u32::from_be_bytes(self.inner) & prefix_len.mask_bits();
        Self { inner: n.to_be_bytes() }
    }

    /// `224.0.0.0/4`.
    pub const fn is_multicast(&self) -> bool {
        matches!(self.inner[0], 224..240)
    }

    /// The limited broadcast address, `255.255.255.255`.
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.inner, [255, 255, 255, 255])
    }

    /// `0.0.0.0`.
    pub const fn is_unspecified(&self) -> bool {
        matches!(self.inner, [0, 0, 0, 0])
    }

    /// `127.0.0.0/8`.
    pub const fn is_loopback(&self) -> bool {
        self.inner[0] == 127
    }
}

impl From<core::net::Ipv4Addr> for Ipv4Addr {
    fn from(ip4: core::net::Ipv4Addr) -> Self {
        Self { inner: ip4.octets() }
    }
}

impl From<Ipv4Addr> for core::net::Ipv4Addr {
    fn from(ip4: Ipv4Addr) -> Self {
        Self::from(ip4.inner)
    }
}

impl From<smoltcp::wire::Ipv4Address> for Ipv4Addr {
    fn from(smolip4: smoltcp::wire::Ipv4Address) -> Self {
        let bytes = smolip4.as_bytes();
        Self::from([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl From<Ipv4Addr> for smoltcp::wire::Ipv4Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self::from_bytes(&ip)
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.bytes())
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let octets: Vec<u8> = val
            .split('.')
            .map(|s| s.parse().map_err(|e| format!("{e}")))
            .collect::<result::Result<Vec<u8>, _>>()?;

        if octets.len() != 4 {
            return Err(format!("malformed ip: {val}"));
        }

        Ok(Self { inner: [octets[0], octets[1], octets[2], octets[3]] })
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

// The raw array is never interesting when debugging; show the dotted
// quad instead.
impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ inner: {self} }}")
    }
}

impl AsRef<[u8]> for Ipv4Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<Ipv4Addr> for [u8; 4] {
    fn from(ip: Ipv4Addr) -> [u8; 4] {
        ip.inner
    }
}

impl Deref for Ipv4Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A valid IPv4 prefix length.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, Ord, PartialOrd,
)]
pub struct Ipv4PrefixLen(u8);

impl TryFrom<u8> for Ipv4PrefixLen {
    type Error = String;

    fn try_from(p: u8) -> Result<Self, Self::Error> {
        Self::new(p)
    }
}

impl Ipv4PrefixLen {
    pub const NETMASK_NONE: Self = Self(0);
    pub const NETMASK_ALL: Self = Self(32);

    pub fn new(prefix_len: u8) -> Result<Self, String> {
        if prefix_len > 32 {
            return Err(format!("bad IPv4 prefix length: {prefix_len}"));
        }

        Ok(Self(prefix_len))
    }

    /// Convert the prefix length into a subnet mask.
    pub fn to_netmask(self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    pub fn val(&self) -> u8 {
        self.0
    }

    // A zero-length prefix has an empty mask; shifting a u32 by 32 is
    // not defined, so handle it separately.
    fn mask_bits(self) -> u32 {
        match self.0 {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }
}

/// An IPv4 CIDR.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: Ipv4PrefixLen,
}

impl core::cmp::Ord for Ipv4Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv4Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    /// Convert a string like "192.168.2.0/24" into an `Ipv4Cidr`.
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err("no '/' found".to_string()),
        };

        let ip = match ip_s.parse() {
            Ok(v) => v,
            Err(e) => return Err(format!("bad IP: {e}")),
        };

        let raw = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(e) => {
                return Err(format!("bad prefix length: {e}"));
            }
        };

        let prefix_len = Ipv4PrefixLen::new(raw)?;
        Ok(Ipv4Cidr::new(ip, prefix_len))
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len.val())
    }
}

impl Ipv4Cidr {
    /// IPv4 multicast address range, `224.0.0.0/4`.
    pub const MCAST: Self = Self {
        ip: Ipv4Addr::from_const([224, 0, 0, 0]),
        prefix_len: Ipv4PrefixLen(4),
    };

    /// The default route, `0.0.0.0/0`.
    pub const DEFAULT: Self =
        Self { ip: Ipv4Addr::ANY_ADDR, prefix_len: Ipv4PrefixLen(0) };

    pub fn ip(&self) -> Ipv4Addr {
        self.parts().0
    }

    /// Does this CIDR represent the default route subnet?
    pub fn is_default(&self) -> bool {
        let (ip, prefix_len) = self.parts();
        ip == Ipv4Addr::ANY_ADDR && prefix_len.val() == 0
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv4Addr) -> bool {
        ip.safe_mask(self.parts().1) == self.ip()
    }

    pub fn new(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Self {
        let ip = ip.safe_mask(prefix_len);
        Ipv4Cidr { ip, prefix_len }
    }

    pub fn new_checked(ip: Ipv4Addr, prefix_len: u8) -> Result<Self, String> {
        let pl = Ipv4PrefixLen::new(prefix_len)?;
        let ip = ip.safe_mask(pl);
        Ok(Ipv4Cidr { ip, prefix_len: pl })
    }

    pub fn parts(&self) -> (Ipv4Addr, Ipv4PrefixLen) {
        (self.ip, self.prefix_len)
    }

    pub fn prefix_len(self) -> u8 {
        self.parts().1.val()
    }

    /// Convert the CIDR prefix length into a subnet mask.
    pub fn to_mask(self) -> Ipv4Addr {
        self.prefix_len.to_netmask()
    }
}

#[cfg(feature = "std")]
impl From<ipnetwork::Ipv4Network> for Ipv4Cidr {
    fn from(n: ipnetwork::Ipv4Network) -> Self {
        let ip = n.ip().into();
        // A valid `Ipv4Network` always carries a prefix of at most 32.
        let prefix = Ipv4PrefixLen(n.prefix());
        Ipv4Cidr::new(ip, prefix)
    }
}

#[cfg(feature = "std")]
impl From<Ipv4Cidr> for ipnetwork::Ipv4Network {
    fn from(c: Ipv4Cidr) -> Self {
        let (ip, prefix) = c.parts();
        // The prefix was validated when the CIDR was built, so the
        // fallback is never taken.
        Self::new(ip.into(), prefix.val())
            .unwrap_or_else(|_| Self::from(core::net::Ipv4Addr::from(ip)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::string::ToString;

    #[cfg(feature = "std")]
    #[test]
    fn ipnetwork_conversions() {
        let net: ipnetwork::Ipv4Network = "172.20.0.0/16".parse().unwrap();
        let cidr = Ipv4Cidr::from(net);
        assert_eq!(cidr, "172.20.0.0/16".parse().unwrap());
        assert!(cidr.is_member("172.20.9.9".parse().unwrap()));

        let back = ipnetwork::Ipv4Network::from(cidr);
        assert_eq!(back, net);
    }

    #[test]
    fn bad_prefix_len() {
        let msg = "bad IPv4 prefix length: 33".to_string();
        assert_eq!(Ipv4PrefixLen::new(33), Err(msg));
    }

    #[test]
    fn bad_cidr() {
        let msg = "bad IPv4 prefix length: 33".to_string();
        assert_eq!("192.168.2.9/33".parse::<Ipv4Cidr>(), Err(msg));
        assert!("192.168.2.9".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn good_cidr() {
        let pl = Ipv4PrefixLen::new(24).unwrap();
        let ip = "192.168.2.0".parse().unwrap();
        assert_eq!(
            Ipv4Cidr::new(ip, pl),
            Ipv4Cidr {
                ip: Ipv4Addr { inner: [192, 168, 2, 0] },
                prefix_len: pl,
            }
        );

        assert_eq!(
            "192.168.2.9/24".parse(),
            Ok(Ipv4Cidr {
                ip: Ipv4Addr { inner: [192, 168, 2, 0] },
                prefix_len: pl,
            })
        );

        assert_eq!(
            "192.168.2.9/24".parse::<Ipv4Cidr>().unwrap().to_string(),
            "192.168.2.0/24".to_string()
        );
    }

    #[test]
    fn cidr_membership() {
        let cidr = "10.0.0.0/8".parse::<Ipv4Cidr>().unwrap();
        assert!(cidr.is_member("10.7.7.7".parse().unwrap()));
        assert!(!cidr.is_member("11.0.0.1".parse().unwrap()));
        assert!(Ipv4Cidr::DEFAULT.is_member("52.10.128.69".parse().unwrap()));
        assert!(Ipv4Cidr::DEFAULT.is_default());

        let host = "192.168.2.11/32".parse::<Ipv4Cidr>().unwrap();
        assert!(host.is_member("192.168.2.11".parse().unwrap()));
        assert!(!host.is_member("192.168.2.12".parse().unwrap()));
    }

    #[test]
    fn ipv4_addr_bad() {
        assert!("192.168.33.1O".parse::<Ipv4Addr>().is_err());
        assert!("192.168.33.256".parse::<Ipv4Addr>().is_err());
        assert!("192.168.33".parse::<Ipv4Addr>().is_err());
    }

    #[test]
    fn ipv4_addr_good() {
        assert_eq!(
            "192.168.33.10".parse(),
            Ok(Ipv4Addr::from([192, 168, 33, 10]))
        );
    }

    #[test]
    fn ipv4_mask() {
        let ip = "192.168.2.77".parse::<Ipv4Addr>().unwrap();
        assert_eq!(ip.mask(24).unwrap(), "192.168.2.0".parse().unwrap());
        assert_eq!(ip.mask(32).unwrap(), ip);
        assert_eq!(ip.mask(0).unwrap(), "0.0.0.0".parse().unwrap());
        assert!(ip.mask(33).is_err());
        assert_eq!(
            Ipv4PrefixLen::new(20).unwrap().to_netmask(),
            "255.255.240.0".parse().unwrap()
        );
    }

    #[test]
    fn address_classes() {
        assert!(Ipv4Addr::LOCAL_BCAST.is_broadcast());
        assert!(Ipv4Addr::ANY_ADDR.is_unspecified());
        assert!(Ipv4Addr::from([224, 0, 0, 1]).is_multicast());
        assert!(Ipv4Addr::from([239, 255, 255, 250]).is_multicast());
        assert!(!Ipv4Addr::from([240, 0, 0, 1]).is_multicast());
        assert!(Ipv4Addr::from([127, 0, 0, 1]).is_loopback());
        assert!(!Ipv4Addr::from([10, 0, 0, 1]).is_loopback());
    }

    #[test]
    fn protocol_conversions() {
        assert_eq!(Protocol::from(6), Protocol::TCP);
        assert_eq!(u8::from(Protocol::Unknown(47)), 47);
        assert_eq!("udp".parse::<Protocol>(), Ok(Protocol::UDP));
        assert_eq!("47".parse::<Protocol>(), Ok(Protocol::Unknown(47)));
        assert!("gre".parse::<Protocol>().is_err());
    }
}
