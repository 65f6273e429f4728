use std::fmt;
use std::io::{BufRead, Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt};

use crate::bits::test_bit;
use crate::error::{Error, Result};

/// Ethertypes the controller distinguishes.
pub mod ether_types {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const LLDP: u16 = 0x88cc;
}

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    fn read(bytes: &mut Cursor<&[u8]>) -> std::io::Result<MacAddr> {
        let mut arr = [0; 6];
        bytes.read_exact(&mut arr)?;
        Ok(MacAddr(arr))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// The type of IPv4 flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub dont_fragment: bool,
    pub more_fragments: bool,
}

impl Flags {
    fn of_int(flags: u32) -> Flags {
        Flags {
            dont_fragment: test_bit(1, flags as u64),
            more_fragments: test_bit(0, flags as u64),
        }
    }
}

/// IPv4 frame of a packet. The transport payload is not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ident: u16,
    pub flags: Flags,
    pub frag: u16,
    pub ttl: u8,
    pub proto: u8,
    pub chksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

const IPV4_MIN_HEADER: usize = 20;

impl Ip {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Ip> {
        let remaining = remaining(bytes);
        if remaining < IPV4_MIN_HEADER {
            return Err(Error::MalformedFrame(format!(
                "IPv4 header truncated: {} bytes",
                remaining
            )));
        }
        let vhl = bytes.read_u8()?;
        if (vhl >> 4) != 4 {
            return Err(Error::MalformedFrame(format!(
                "IPv4 ethertype with IP version {}",
                vhl >> 4
            )));
        }
        let ihl = (vhl & 0x0f) as usize * 4;
        if ihl < IPV4_MIN_HEADER || ihl > remaining {
            return Err(Error::MalformedFrame(format!("bad IPv4 header length {}", ihl)));
        }
        let tos = bytes.read_u8()?;
        bytes.consume(2);
        let ident = bytes.read_u16::<BigEndian>()?;
        let frag = bytes.read_u16::<BigEndian>()?;
        let flags = Flags::of_int((frag as u32) >> 13);
        let ttl = bytes.read_u8()?;
        let proto = bytes.read_u8()?;
        let chksum = bytes.read_u16::<BigEndian>()?;
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        Ok(Ip {
            tos,
            ident,
            flags,
            frag: frag & 0x1fff,
            ttl,
            proto,
            chksum,
            src,
            dst,
        })
    }
}

/// Address resolution protocol (ARP) packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arp {
    Query(MacAddr, Ipv4Addr, Ipv4Addr),
    Reply(MacAddr, Ipv4Addr, MacAddr, Ipv4Addr),
}

const ARP_LEN: usize = 28;

impl Arp {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Arp> {
        if remaining(bytes) < ARP_LEN {
            return None;
        }
        bytes.consume(6);
        let oper = bytes.read_u16::<BigEndian>().ok()?;
        let sha = MacAddr::read(bytes).ok()?;
        let spa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let tha = MacAddr::read(bytes).ok()?;
        let tpa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        match oper {
            0x0001 => Some(Arp::Query(sha, spa, tpa)),
            0x0002 => Some(Arp::Reply(sha, spa, tha, tpa)),
            _ => None,
        }
    }
}

/// Represents a packet at the network protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Lldp,
    Unparsable(u16, Vec<u8>),
}

/// Represents a packet at the ethernet protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_dei: bool,
    pub dl_vlan_pcp: u8,
    pub dl_typ: u16,
    pub nw: Nw,
}

const ETHERNET_HEADER: usize = 14;

impl Packet {
    pub fn parse(buf: &[u8]) -> Result<Packet> {
        if buf.len() < ETHERNET_HEADER {
            return Err(Error::MalformedFrame(format!(
                "ethernet frame truncated: {} bytes",
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let dst = MacAddr::read(&mut bytes)?;
        let src = MacAddr::read(&mut bytes)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (tag, dei, pcp, typ) = match typ {
            ether_types::VLAN => {
                if remaining(&bytes) < 4 {
                    return Err(Error::MalformedFrame("802.1Q tag truncated".to_string()));
                }
                let tag_and_pcp = bytes.read_u16::<BigEndian>()?;
                let tag = tag_and_pcp & 0xfff;
                let dei = (tag_and_pcp & 0x1000) > 0;
                let pcp = tag_and_pcp >> 13;
                let typ = bytes.read_u16::<BigEndian>()?;
                (Some(tag), dei, pcp as u8, typ)
            }
            _ => (None, false, 0x0, typ),
        };
        let nw_header = match typ {
            ether_types::IPV4 => Nw::Ip(Ip::parse(&mut bytes)?),
            ether_types::LLDP => Nw::Lldp,
            ether_types::ARP => {
                let rest = rest(&bytes);
                match Arp::parse(&mut bytes) {
                    Some(arp) => Nw::Arp(arp),
                    None => Nw::Unparsable(typ, rest),
                }
            }
            _ => Nw::Unparsable(typ, rest(&bytes)),
        };
        Ok(Packet {
            dl_src: src,
            dl_dst: dst,
            dl_vlan: tag,
            dl_vlan_dei: dei,
            dl_vlan_pcp: pcp,
            dl_typ: typ,
            nw: nw_header,
        })
    }

    /// Link-layer discovery frames never take part in learning or forwarding.
    pub fn is_lldp(&self) -> bool {
        matches!(self.nw, Nw::Lldp)
    }

    /// The `(source, destination)` IPv4 pair, present only for IPv4 frames.
    pub fn ipv4_pair(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        match self.nw {
            Nw::Ip(ref ip) => Some((ip.src, ip.dst)),
            _ => None,
        }
    }
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn rest(bytes: &Cursor<&[u8]>) -> Vec<u8> {
    let pos = (bytes.position() as usize).min(bytes.get_ref().len());
    bytes.get_ref()[pos..].to_vec()
}
