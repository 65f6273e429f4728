use std::io::{self, BufRead, Cursor, Read, Write};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, pad8, test_bit};
use crate::packet::MacAddr;

/// Version byte carried by every OpenFlow 1.3 header.
pub const OFP_VERSION: u8 = 0x04;
/// `buffer_id` value meaning the packet is not buffered on the switch.
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
/// `max_len` value asking the switch to send the whole packet to the controller.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// OpenFlow 1.3 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Experimenter,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartReq,
    MultipartResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
    RoleReq,
    RoleResp,
    GetAsyncReq,
    GetAsyncResp,
    SetAsync,
    MeterMod,
}

impl MsgCode {
    const ALL: [MsgCode; 30] = [
        MsgCode::Hello,
        MsgCode::Error,
        MsgCode::EchoReq,
        MsgCode::EchoResp,
        MsgCode::Experimenter,
        MsgCode::FeaturesReq,
        MsgCode::FeaturesResp,
        MsgCode::GetConfigReq,
        MsgCode::GetConfigResp,
        MsgCode::SetConfig,
        MsgCode::PacketIn,
        MsgCode::FlowRemoved,
        MsgCode::PortStatus,
        MsgCode::PacketOut,
        MsgCode::FlowMod,
        MsgCode::GroupMod,
        MsgCode::PortMod,
        MsgCode::TableMod,
        MsgCode::MultipartReq,
        MsgCode::MultipartResp,
        MsgCode::BarrierReq,
        MsgCode::BarrierResp,
        MsgCode::QueueGetConfigReq,
        MsgCode::QueueGetConfigResp,
        MsgCode::RoleReq,
        MsgCode::RoleResp,
        MsgCode::GetAsyncReq,
        MsgCode::GetAsyncResp,
        MsgCode::SetAsync,
        MsgCode::MeterMod,
    ];

    pub fn from_u8(typ: u8) -> Option<MsgCode> {
        Self::ALL.get(typ as usize).copied()
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> io::Result<Self>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> io::Result<()>;
}

fn invalid(what: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, what)
}

fn skip(bytes: &mut Cursor<&[u8]>, n: usize) -> io::Result<()> {
    let left = bytes.get_ref().len().saturating_sub(bytes.position() as usize);
    if left < n {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    bytes.consume(n);
    Ok(())
}

fn read_vec(bytes: &mut Cursor<&[u8]>, n: usize) -> io::Result<Vec<u8>> {
    let mut v = vec![0; n];
    bytes.read_exact(&mut v)?;
    Ok(v)
}

fn read_rest(bytes: &mut Cursor<&[u8]>) -> Vec<u8> {
    let pos = (bytes.position() as usize).min(bytes.get_ref().len());
    let v = bytes.get_ref()[pos..].to_vec();
    bytes.set_position(bytes.get_ref().len() as u64);
    v
}

/// OXM class of the fields this controller matches on.
const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;
/// `ofp_match.type` for OXM encoded matches.
const OFPMT_OXM: u16 = 1;

#[repr(u8)]
#[derive(Copy, Clone)]
enum OxmField {
    InPort = 0,
    EthDst = 3,
    EthSrc = 4,
    EthType = 5,
    Ipv4Src = 11,
    Ipv4Dst = 12,
}

fn oxm_header(field: OxmField, len: u8) -> u32 {
    ((OFPXMC_OPENFLOW_BASIC as u32) << 16) | ((field as u32) << 9) | len as u32
}

/// Fields to match against flows. `None` fields are wildcarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u32>,
    pub eth_dst: Option<MacAddr>,
    pub eth_src: Option<MacAddr>,
    pub eth_type: Option<u16>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
}

impl Pattern {
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Length of the `ofp_match` structure before padding.
    fn unpadded_len(&self) -> usize {
        let field = |present: bool, len: usize| if present { 4 + len } else { 0 };
        4 + field(self.in_port.is_some(), 4)
            + field(self.eth_dst.is_some(), 6)
            + field(self.eth_src.is_some(), 6)
            + field(self.eth_type.is_some(), 2)
            + field(self.ipv4_src.is_some(), 4)
            + field(self.ipv4_dst.is_some(), 4)
    }

    pub fn size_of(&self) -> usize {
        pad8(self.unpadded_len())
    }

    /// Fields are written in prerequisite order: a dependent field never precedes the field it
    /// depends on.
    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        let len = self.unpadded_len();
        bytes.write_u16::<BigEndian>(OFPMT_OXM)?;
        bytes.write_u16::<BigEndian>(len as u16)?;
        if let Some(port) = self.in_port {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::InPort, 4))?;
            bytes.write_u32::<BigEndian>(port)?;
        }
        if let Some(mac) = self.eth_dst {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::EthDst, 6))?;
            bytes.write_all(&mac.octets())?;
        }
        if let Some(mac) = self.eth_src {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::EthSrc, 6))?;
            bytes.write_all(&mac.octets())?;
        }
        if let Some(typ) = self.eth_type {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::EthType, 2))?;
            bytes.write_u16::<BigEndian>(typ)?;
        }
        if let Some(ip) = self.ipv4_src {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::Ipv4Src, 4))?;
            bytes.write_u32::<BigEndian>(ip.into())?;
        }
        if let Some(ip) = self.ipv4_dst {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::Ipv4Dst, 4))?;
            bytes.write_u32::<BigEndian>(ip.into())?;
        }
        bytes.write_all(&vec![0; pad8(len) - len])
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Pattern> {
        let typ = bytes.read_u16::<BigEndian>()?;
        if typ != OFPMT_OXM {
            return Err(invalid(format!("unsupported match type {}", typ)));
        }
        let len = bytes.read_u16::<BigEndian>()? as usize;
        if len < 4 {
            return Err(invalid(format!("match length {} too short", len)));
        }
        let oxms = read_vec(bytes, len - 4)?;
        skip(bytes, pad8(len) - len)?;

        let mut pattern = Pattern::match_all();
        let mut oxms = Cursor::new(&oxms[..]);
        while (oxms.position() as usize) < oxms.get_ref().len() {
            let hdr = oxms.read_u32::<BigEndian>()?;
            let class = (hdr >> 16) as u16;
            let field = ((hdr >> 9) & 0x7f) as u8;
            let has_mask = test_bit(8, hdr as u64);
            let value = read_vec(&mut oxms, (hdr & 0xff) as usize)?;
            if class != OFPXMC_OPENFLOW_BASIC || has_mask {
                continue;
            }
            let mut value = Cursor::new(&value[..]);
            match field {
                f if f == OxmField::InPort as u8 => {
                    pattern.in_port = Some(value.read_u32::<BigEndian>()?)
                }
                f if f == OxmField::EthDst as u8 => {
                    pattern.eth_dst = Some(MacAddr(read_mac(&mut value)?))
                }
                f if f == OxmField::EthSrc as u8 => {
                    pattern.eth_src = Some(MacAddr(read_mac(&mut value)?))
                }
                f if f == OxmField::EthType as u8 => {
                    pattern.eth_type = Some(value.read_u16::<BigEndian>()?)
                }
                f if f == OxmField::Ipv4Src as u8 => {
                    pattern.ipv4_src = Some(Ipv4Addr::from(value.read_u32::<BigEndian>()?))
                }
                f if f == OxmField::Ipv4Dst as u8 => {
                    pattern.ipv4_dst = Some(Ipv4Addr::from(value.read_u32::<BigEndian>()?))
                }
                _ => (),
            }
        }
        Ok(pattern)
    }
}

fn read_mac(bytes: &mut Cursor<&[u8]>) -> io::Result<[u8; 6]> {
    let mut arr = [0; 6];
    bytes.read_exact(&mut arr)?;
    Ok(arr)
}

/// Port behavior.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u32),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, carrying at most `max_len` bytes of the packet.
    Controller(u16),
    Local,
}

#[repr(u32)]
enum OfpPort {
    OFPPMax = 0xffff_ff00,
    OFPPInPort = 0xffff_fff8,
    OFPPTable = 0xffff_fff9,
    OFPPNormal = 0xffff_fffa,
    OFPPFlood = 0xffff_fffb,
    OFPPAll = 0xffff_fffc,
    OFPPController = 0xffff_fffd,
    OFPPLocal = 0xffff_fffe,
    OFPPAny = 0xffff_ffff,
}

impl PseudoPort {
    fn of_int(p: u32) -> io::Result<Option<PseudoPort>> {
        if (OfpPort::OFPPAny as u32) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u32, len: u16) -> io::Result<PseudoPort> {
        let port = match p {
            p if p == (OfpPort::OFPPInPort as u32) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u32) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u32) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u32) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u32) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u32) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u32) => PseudoPort::Local,
            p if p <= (OfpPort::OFPPMax as u32) => PseudoPort::PhysicalPort(p),
            p => return Err(invalid(format!("unsupported port number {:#x}", p))),
        };
        Ok(port)
    }

    fn to_int(pp: PseudoPort) -> u32 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
}

const ACTION_OUTPUT_LEN: usize = 16;
/// Type, length, port and max_len; anything shorter cannot hold an output action.
const ACTION_OUTPUT_MIN_LEN: usize = 10;

impl Action {
    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => ACTION_OUTPUT_LEN,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse_sequence(buf: &[u8]) -> io::Result<Vec<Action>> {
        let mut bytes = Cursor::new(buf);
        let mut actions = vec![];
        while (bytes.position() as usize) < buf.len() {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 8 {
                return Err(invalid(format!("action length {} too short", len)));
            }
            if typ == OfpActionType::OFPATOutput as u16 {
                if len < ACTION_OUTPUT_MIN_LEN {
                    return Err(invalid(format!("output action length {} too short", len)));
                }
                let port = bytes.read_u32::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                skip(&mut bytes, len - 10)?;
                actions.push(Action::Output(PseudoPort::make(port, max_len)?));
            } else {
                skip(&mut bytes, len - 4)?;
            }
        }
        Ok(actions)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(*act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) -> io::Result<()> {
        match act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(OfpActionType::OFPATOutput as u16)?;
                bytes.write_u16::<BigEndian>(ACTION_OUTPUT_LEN as u16)?;
                bytes.write_u32::<BigEndian>(PseudoPort::to_int(pp))?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })?;
                bytes.write_all(&[0; 6])
            }
        }
    }
}

/// Instructions attached to a flow entry. A flow without instructions drops matching packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    ApplyActions(Vec<Action>),
}

const OFPIT_APPLY_ACTIONS: u16 = 4;

impl Instruction {
    fn size_of(inst: &Instruction) -> usize {
        match *inst {
            Instruction::ApplyActions(ref acts) => 8 + Action::size_of_sequence(acts),
        }
    }

    fn marshal(inst: Instruction, bytes: &mut Vec<u8>) -> io::Result<()> {
        let size = Instruction::size_of(&inst);
        match inst {
            Instruction::ApplyActions(acts) => {
                bytes.write_u16::<BigEndian>(OFPIT_APPLY_ACTIONS)?;
                bytes.write_u16::<BigEndian>(size as u16)?;
                bytes.write_all(&[0; 4])?;
                for act in Action::move_controller_last(acts) {
                    if act == Action::Output(PseudoPort::Table) {
                        return Err(invalid("OFPP_TABLE not allowed in installed flow".into()));
                    }
                    Action::marshal(act, bytes)?;
                }
                Ok(())
            }
        }
    }

    fn parse_sequence(buf: &[u8]) -> io::Result<Vec<Instruction>> {
        let mut bytes = Cursor::new(buf);
        let mut insts = vec![];
        while (bytes.position() as usize) < buf.len() {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 8 {
                return Err(invalid(format!("instruction length {} too short", len)));
            }
            if typ == OFPIT_APPLY_ACTIONS {
                skip(&mut bytes, 4)?;
                let acts = read_vec(&mut bytes, len - 8)?;
                insts.push(Instruction::ApplyActions(Action::parse_sequence(&acts)?));
            } else {
                skip(&mut bytes, len - 4)?;
            }
        }
        Ok(insts)
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Hello message. The version bitmap element, when present, lists every version the sender
/// speaks; bit `n` stands for wire version `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hello {
    pub version_bitmap: Option<u32>,
}

const OFPHET_VERSIONBITMAP: u16 = 1;

impl Hello {
    /// The Hello this controller sends: only OpenFlow 1.3.
    pub fn ours() -> Hello {
        Hello {
            version_bitmap: Some(bit(OFP_VERSION as u64, 0, true) as u32),
        }
    }

    /// Whether a peer that sent this Hello under header version `peer_version` can speak 1.3.
    pub fn supports_ours(&self, peer_version: u8) -> bool {
        match self.version_bitmap {
            Some(bitmap) => test_bit(OFP_VERSION as u64, bitmap as u64),
            None => peer_version >= OFP_VERSION,
        }
    }
}

impl MessageType for Hello {
    fn size_of(hello: &Hello) -> usize {
        if hello.version_bitmap.is_some() {
            8
        } else {
            0
        }
    }

    fn parse(buf: &[u8]) -> io::Result<Hello> {
        let mut bytes = Cursor::new(buf);
        let mut hello = Hello::default();
        while buf.len().saturating_sub(bytes.position() as usize) >= 4 {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 4 {
                return Err(invalid(format!("hello element length {} too short", len)));
            }
            if typ == OFPHET_VERSIONBITMAP && len >= 8 {
                hello.version_bitmap = Some(bytes.read_u32::<BigEndian>()?);
                skip(&mut bytes, pad8(len) - 8)?;
            } else {
                skip(&mut bytes, pad8(len) - 4)?;
            }
        }
        Ok(hello)
    }

    fn marshal(hello: Hello, bytes: &mut Vec<u8>) -> io::Result<()> {
        if let Some(bitmap) = hello.version_bitmap {
            bytes.write_u16::<BigEndian>(OFPHET_VERSIONBITMAP)?;
            bytes.write_u16::<BigEndian>(8)?;
            bytes.write_u32::<BigEndian>(bitmap)?;
        }
        Ok(())
    }
}

/// Error type reported when Hello negotiation fails.
pub const OFPET_HELLO_FAILED: u16 = 0;
/// Hello failure code: no compatible version.
pub const OFPHFC_INCOMPATIBLE: u16 = 0;

/// Error message, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl ErrorMsg {
    pub fn hello_failed(reason: &str) -> ErrorMsg {
        ErrorMsg {
            typ: OFPET_HELLO_FAILED,
            code: OFPHFC_INCOMPATIBLE,
            data: reason.as_bytes().to_vec(),
        }
    }
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> io::Result<ErrorMsg> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            typ,
            code,
            data: read_rest(&mut bytes),
        })
    }

    fn marshal(err: ErrorMsg, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(err.typ)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.write_all(&err.data)
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub group_stats: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub port_blocked: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d as u64),
            table_stats: test_bit(1, d as u64),
            port_stats: test_bit(2, d as u64),
            group_stats: test_bit(3, d as u64),
            ip_reasm: test_bit(5, d as u64),
            queue_stats: test_bit(6, d as u64),
            port_blocked: test_bit(8, d as u64),
        }
    }

    fn to_int(c: Capabilities) -> u32 {
        let mut d = 0;
        d = bit(0, d, c.flow_stats);
        d = bit(1, d, c.table_stats);
        d = bit(2, d, c.port_stats);
        d = bit(3, d, c.group_stats);
        d = bit(5, d, c.ip_reasm);
        d = bit(6, d, c.queue_stats);
        d = bit(8, d, c.port_blocked);
        d as u32
    }
}

/// Switch features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub auxiliary_id: u8,
    pub supported_capabilities: Capabilities,
}

impl MessageType for SwitchFeatures {
    fn size_of(_: &SwitchFeatures) -> usize {
        24
    }

    fn parse(buf: &[u8]) -> io::Result<SwitchFeatures> {
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        let auxiliary_id = bytes.read_u8()?;
        skip(&mut bytes, 2)?;
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let _reserved = bytes.read_u32::<BigEndian>()?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            supported_capabilities,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u8(sf.auxiliary_id)?;
        bytes.write_all(&[0; 2])?;
        bytes.write_u32::<BigEndian>(Capabilities::to_int(sf.supported_capabilities))?;
        bytes.write_u32::<BigEndian>(0)
    }
}

/// Type of modification to perform on a flow table.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(cmd: u8) -> io::Result<FlowModCmd> {
        match cmd {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(invalid(format!("unknown flow_mod command {}", c))),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub table_id: u8,
    pub pattern: Pattern,
    pub priority: u16,
    pub instructions: Vec<Instruction>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

/// Fixed part of `ofp_flow_mod` between the header and the match.
const FLOW_MOD_FIXED_LEN: usize = 40;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }

    /// The actions applied by this flow; empty for a drop rule.
    pub fn actions(&self) -> Vec<Action> {
        self.instructions
            .iter()
            .flat_map(|inst| match inst {
                Instruction::ApplyActions(acts) => acts.clone(),
            })
            .collect()
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        FLOW_MOD_FIXED_LEN
            + msg.pattern.size_of()
            + msg.instructions.iter().map(Instruction::size_of).sum::<usize>()
    }

    fn parse(buf: &[u8]) -> io::Result<FlowMod> {
        let mut bytes = Cursor::new(buf);
        let cookie = bytes.read_u64::<BigEndian>()?;
        let _cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table_id = bytes.read_u8()?;
        let command = FlowModCmd::of_int(bytes.read_u8()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u32::<BigEndian>()?)?;
        let _out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        skip(&mut bytes, 2)?;
        let pattern = Pattern::parse(&mut bytes)?;
        let instructions = Instruction::parse_sequence(&read_rest(&mut bytes))?;
        Ok(FlowMod {
            command,
            table_id,
            pattern,
            priority: prio,
            instructions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u64::<BigEndian>(0)?;
        bytes.write_u8(fm.table_id)?;
        bytes.write_u8(fm.command as u8)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u32::<BigEndian>(match fm.out_port {
            None => OfpPort::OFPPAny as u32,
            Some(x) => PseudoPort::to_int(x),
        })?;
        bytes.write_u32::<BigEndian>(OfpPort::OFPPAny as u32)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            fm.check_overlap,
            fm.notify_when_removed,
        ))?;
        bytes.write_all(&[0; 2])?;
        fm.pattern.marshal(bytes)?;
        for inst in fm.instructions {
            Instruction::marshal(inst, bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        payload.bytes().len()
    }

    /// The frame bytes carried with the message, whether or not the switch also buffered it.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    pub fn buffer_id(&self) -> Option<u32> {
        match *self {
            Payload::Buffered(id, _) => Some(id),
            Payload::NotBuffered(_) => None,
        }
    }

    fn of_buffer_id(buffer_id: u32, data: Vec<u8>) -> Payload {
        match buffer_id {
            OFP_NO_BUFFER => Payload::NotBuffered(data),
            n => Payload::Buffered(n, data),
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    Action,
    InvalidTtl,
}

impl PacketInReason {
    fn of_int(r: u8) -> io::Result<PacketInReason> {
        match r {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::Action),
            2 => Ok(PacketInReason::InvalidTtl),
            r => Err(invalid(format!("unknown packet_in reason {}", r))),
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u32,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
}

impl PacketIn {
    fn pattern(&self) -> Pattern {
        Pattern {
            in_port: Some(self.port),
            ..Pattern::match_all()
        }
    }
}

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        16 + pi.pattern().size_of() + 2 + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> io::Result<PacketIn> {
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let reason = PacketInReason::of_int(bytes.read_u8()?)?;
        let table_id = bytes.read_u8()?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let pattern = Pattern::parse(&mut bytes)?;
        let port = pattern
            .in_port
            .ok_or_else(|| invalid("packet_in without in_port".into()))?;
        skip(&mut bytes, 2)?;
        Ok(PacketIn {
            input_payload: Payload::of_buffer_id(buf_id, read_rest(&mut bytes)),
            total_len,
            port,
            reason,
            table_id,
            cookie,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(pi.input_payload.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(pi.table_id)?;
        bytes.write_u64::<BigEndian>(pi.cookie)?;
        pi.pattern().marshal(bytes)?;
        bytes.write_all(&[0; 2])?;
        bytes.write_all(pi.input_payload.bytes())
    }
}

/// Send a packet out of the datapath. Buffered payloads reference the switch buffer and carry
/// no frame bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u32>,
    pub apply_actions: Vec<Action>,
}

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        16 + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> io::Result<PacketOut> {
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u32::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        skip(&mut bytes, 6)?;
        let actions = read_vec(&mut bytes, actions_len)?;
        Ok(PacketOut {
            apply_actions: Action::parse_sequence(&actions)?,
            port_id: match in_port {
                p if p == OfpPort::OFPPController as u32 => None,
                p => Some(p),
            },
            output_payload: Payload::of_buffer_id(buf_id, read_rest(&mut bytes)),
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(po.output_payload.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u32::<BigEndian>(po.port_id.unwrap_or(OfpPort::OFPPController as u32))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        bytes.write_all(&[0; 6])?;
        for act in Action::move_controller_last(po.apply_actions) {
            Action::marshal(act, bytes)?;
        }
        match po.output_payload {
            Payload::Buffered(..) => Ok(()),
            Payload::NotBuffered(buf) => bytes.write_all(&buf),
        }
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::error::{Error, Result};
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Message {
        Hello(Hello),
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
        /// A well-formed message of a type this controller does not act on.
        Unsupported(u8),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code.
        fn type_byte_of_message(msg: &Message) -> u8 {
            let code = match *msg {
                Message::Hello(_) => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Unsupported(typ) => return typ,
            };
            code as u8
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> io::Result<()> {
            match msg {
                Message::Hello(hello) => Hello::marshal(hello, bytes),
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => bytes.write_all(&buf),
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(po) => PacketOut::marshal(po, bytes),
                Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply
                | Message::Unsupported(_) => Ok(()),
            }
        }

        fn parse_body(code: MsgCode, buf: &[u8]) -> io::Result<Message> {
            let msg = match code {
                MsgCode::Hello => Message::Hello(Hello::parse(buf)?),
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                other => Message::Unsupported(other as u8),
            };
            Ok(msg)
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            OfpHeader::size()
                + match *msg {
                    Message::Hello(ref hello) => Hello::size_of(hello),
                    Message::Error(ref err) => ErrorMsg::size_of(err),
                    Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                    Message::FeaturesReply(ref feats) => SwitchFeatures::size_of(feats),
                    Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                    Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                    Message::PacketOut(ref po) => PacketOut::size_of(po),
                    Message::FeaturesReq
                    | Message::BarrierRequest
                    | Message::BarrierReply
                    | Message::Unsupported(_) => 0,
                }
        }

        /// Create an `OfpHeader` for the given `xid` and `msg`.
        fn header_of(xid: u32, msg: &Message) -> Result<OfpHeader> {
            let sizeof_buf = Self::size_of(msg);
            let length = u16::try_from(sizeof_buf)
                .map_err(|_| Error::Codec(format!("message of {} bytes too large", sizeof_buf)))?;
            Ok(OfpHeader::new(
                OFP_VERSION,
                Self::type_byte_of_message(msg),
                length,
                xid,
            ))
        }

        /// Returns a `u8` buffer containing a marshaled OpenFlow header and the message `msg`.
        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        /// Returns a pair `(u32, Message)` of the transaction id and OpenFlow message parsed from
        /// the given OpenFlow header `header`, and buffer `buf`.
        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            let msg = match header.type_code() {
                Some(code) => Message::parse_body(code, buf)
                    .map_err(|e| Error::Codec(format!("{:?}: {}", code, e)))?,
                None => Message::Unsupported(header.type_byte()),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`. An empty action list produces a flow without instructions, which drops.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            table_id: 0,
            pattern,
            priority: prio,
            instructions: if actions.is_empty() {
                vec![]
            } else {
                vec![Instruction::ApplyActions(actions)]
            },
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }
}
