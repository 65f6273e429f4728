use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::openflow0x04::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub const fn size() -> usize {
        8
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal<W: Write>(bytes: &mut W, header: OfpHeader) -> io::Result<()> {
        bytes.write_u8(header.version)?;
        bytes.write_u8(header.typ)?;
        bytes.write_u16::<BigEndian>(header.length)?;
        bytes.write_u32::<BigEndian>(header.xid)
    }

    /// Takes a message buffer (sized for an `OfpHeader`) and returns an `OfpHeader`.
    pub fn parse(buf: [u8; 8]) -> Self {
        OfpHeader {
            version: buf[0],
            typ: buf[1],
            length: BigEndian::read_u16(&buf[2..4]),
            xid: BigEndian::read_u32(&buf[4..8]),
        }
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw message type byte of a header.
    pub fn type_byte(&self) -> u8 {
        self.typ
    }

    /// Return the OpenFlow 1.3 message type code of a header, if the type byte is known.
    pub fn type_code(&self) -> Option<MsgCode> {
        MsgCode::from_u8(self.typ)
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the length of the message body that follows the header.
    pub fn body_length(&self) -> Option<usize> {
        self.length().checked_sub(Self::size())
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let hdr = OfpHeader::new(0x04, 10, 42, 0xdead_beef);
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, hdr).unwrap();
        assert_eq!(bytes, [0x04, 10, 0, 42, 0xde, 0xad, 0xbe, 0xef]);

        let parsed = OfpHeader::parse(bytes.try_into().unwrap());
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.type_code(), Some(MsgCode::PacketIn));
        assert_eq!(parsed.body_length(), Some(34));
    }

    #[test]
    fn short_length_has_no_body() {
        let hdr = OfpHeader::new(0x04, 0, 4, 1);
        assert_eq!(hdr.body_length(), None);
    }

    #[test]
    fn unknown_type_has_no_code() {
        let hdr = OfpHeader::new(0x04, 200, 8, 1);
        assert_eq!(hdr.type_code(), None);
        assert_eq!(hdr.type_byte(), 200);
    }
}
