//! Per-connection switch sessions and the registry of active switches.

use std::io::{self, Read, Write};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::mac_table::DatapathId;
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{MsgCode, OFP_VERSION};

/// Controller-local identifier of one control-channel connection.
pub type SessionId = u64;

/// Handshake state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, Hello not yet received.
    Connecting,
    /// Versions agreed, waiting for the features reply.
    Handshaking,
    /// Features received, table-miss pushed, packet-ins are processed.
    Active,
    Disconnected,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking) | (Handshaking, Active) | (Connecting | Handshaking | Active, Disconnected)
        )
    }
}

/// One switch connection. Owns the stream; all reads and writes for the switch go through it.
pub struct SwitchSession<S> {
    id: SessionId,
    dpid: Option<DatapathId>,
    state: SessionState,
    stream: S,
    next_xid: u32,
}

impl<S: Read + Write> SwitchSession<S> {
    pub fn new(id: SessionId, stream: S) -> Self {
        Self {
            id,
            dpid: None,
            state: SessionState::Connecting,
            stream,
            next_xid: 1,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn dpid(&self) -> Option<DatapathId> {
        self.dpid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Protocol(format!(
                "session {} cannot move from {:?} to {:?}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Bind the session to the switch that identified itself in the features reply.
    pub fn activate(&mut self, dpid: DatapathId) -> Result<()> {
        self.advance(SessionState::Active)?;
        self.dpid = Some(dpid);
        Ok(())
    }

    /// Read one whole message. `None` means the peer closed the connection between messages.
    ///
    /// Anything but Hello must carry the negotiated version.
    pub fn recv(&mut self) -> Result<Option<(OfpHeader, Vec<u8>)>> {
        let mut buf = [0u8; 8];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let header = OfpHeader::parse(buf);
        if header.type_code() != Some(MsgCode::Hello) && header.version() != OFP_VERSION {
            return Err(Error::UnsupportedVersion {
                peer: header.version(),
            });
        }
        let body_len = header
            .body_length()
            .ok_or_else(|| Error::Codec(format!("header length {} too short", header.length())))?;
        let mut body = vec![0; body_len];
        self.stream.read_exact(&mut body)?;
        Ok(Some((header, body)))
    }

    /// Send `msg` under a fresh transaction id.
    pub fn send(&mut self, msg: Message) -> Result<()> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        self.reply(xid, msg)
    }

    /// Send `msg` under the transaction id `xid` of the request it answers.
    pub fn reply(&mut self, xid: u32, msg: Message) -> Result<()> {
        let bytes = Message::marshal(xid, msg)?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Maps each datapath id to the session currently speaking for it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashMap<DatapathId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` the session for `dpid`, running `on_activate` under the entry lock.
    ///
    /// Returns the superseded session, if the switch was already connected.
    pub fn activate<F: FnOnce()>(
        &self,
        dpid: DatapathId,
        id: SessionId,
        on_activate: F,
    ) -> Option<SessionId> {
        match self.active.entry(dpid) {
            Entry::Occupied(mut e) => {
                on_activate();
                Some(e.insert(id))
            }
            Entry::Vacant(e) => {
                on_activate();
                e.insert(id);
                None
            }
        }
    }

    /// Remove `dpid` if `id` still speaks for it, running `on_retire` under the entry lock.
    ///
    /// A superseded session retires nothing.
    pub fn retire<F: FnOnce()>(&self, dpid: DatapathId, id: SessionId, on_retire: F) -> bool {
        match self.active.entry(dpid) {
            Entry::Occupied(e) if *e.get() == id => {
                on_retire();
                e.remove();
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, dpid: DatapathId, id: SessionId) -> bool {
        self.active.get(&dpid).map(|cur| *cur == id).unwrap_or(false)
    }

    pub fn session_of(&self, dpid: DatapathId) -> Option<SessionId> {
        self.active.get(&dpid).map(|cur| *cur)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
