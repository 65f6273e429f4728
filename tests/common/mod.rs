//! In-memory switch emulation for driving the controller end to end.
#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ofp_firewall::config::ControllerConfig;
use ofp_firewall::firewall_switch::FirewallSwitch;
use ofp_firewall::ofp_controller::openflow0x04::Dispatcher;
use ofp_firewall::ofp_controller::OfpController;
use ofp_firewall::ofp_header::OfpHeader;
use ofp_firewall::ofp_message::OfpMessage;
use ofp_firewall::openflow0x04::message::Message;
use ofp_firewall::openflow0x04::{
    Capabilities, FlowMod, Hello, PacketIn, PacketInReason, PacketOut, Payload, SwitchFeatures,
};
use ofp_firewall::packet::MacAddr;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One end of an in-memory byte stream. Dropping it closes the peer's read side.
pub struct PipeEnd {
    tx: Sender<Vec<u8>>,
    /// `None` once the read half is shut; the peer's writes then fail.
    rx: Option<Receiver<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
    timeout: Option<Duration>,
}

pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let end = |tx, rx| PipeEnd {
        tx,
        rx: Some(rx),
        pending: vec![],
        pos: 0,
        timeout: None,
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

impl PipeEnd {
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Shut the read half, like `shutdown(Read)` on a socket.
    pub fn close_read(&mut self) {
        self.rx = None;
        self.pending.clear();
        self.pos = 0;
    }
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            let Some(rx) = self.rx.as_ref() else {
                return Ok(0);
            };
            let chunk = match self.timeout {
                Some(t) => match rx.recv_timeout(t) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "pipe read timed out"))
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(0),
                },
                None => match rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(0),
                },
            };
            self.pending = chunk;
            self.pos = 0;
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub type Controller = Arc<Dispatcher<FirewallSwitch>>;

pub fn controller(config: &ControllerConfig) -> Controller {
    Arc::new(Dispatcher::new(Arc::new(FirewallSwitch::from_config(config))))
}

pub fn features(dpid: u64) -> SwitchFeatures {
    SwitchFeatures {
        datapath_id: dpid,
        num_buffers: 256,
        num_tables: 254,
        auxiliary_id: 0,
        supported_capabilities: Capabilities::default(),
    }
}

/// Plays the switch side of one control channel.
pub struct MockSwitch {
    pub dpid: u64,
    end: Option<PipeEnd>,
    session: Option<JoinHandle<ofp_firewall::Result<()>>>,
    next_xid: u32,
    byte_by_byte: bool,
}

impl MockSwitch {
    pub fn connect(controller: &Controller, dpid: u64) -> MockSwitch {
        let (mut ours, theirs) = pipe();
        ours.set_read_timeout(Some(READ_TIMEOUT));
        let controller = Arc::clone(controller);
        let session = thread::spawn(move || controller.handle_client_connected(theirs));
        MockSwitch {
            dpid,
            end: Some(ours),
            session: Some(session),
            next_xid: 1000,
            byte_by_byte: false,
        }
    }

    /// Deliver every later message one byte per write.
    pub fn byte_by_byte(mut self) -> MockSwitch {
        self.byte_by_byte = true;
        self
    }

    fn end(&mut self) -> &mut PipeEnd {
        self.end.as_mut().expect("switch already disconnected")
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        if self.byte_by_byte {
            for b in bytes {
                self.end().write_all(&[*b]).expect("write byte");
            }
        } else {
            self.end().write_all(bytes).expect("write message");
        }
    }

    pub fn send_with_xid(&mut self, xid: u32, msg: Message) {
        let bytes = Message::marshal(xid, msg).expect("marshal");
        self.send_raw(&bytes);
    }

    pub fn send(&mut self, msg: Message) -> u32 {
        let xid = self.next_xid;
        self.next_xid += 1;
        self.send_with_xid(xid, msg);
        xid
    }

    /// Next message from the controller, or `None` once it closed the channel.
    pub fn try_recv(&mut self) -> Option<(u32, Message)> {
        let mut buf = [0u8; 8];
        match self.end().read_exact(&mut buf) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => panic!("no message from controller: {}", e),
        }
        let header = OfpHeader::parse(buf);
        let mut body = vec![0; header.body_length().expect("header length")];
        self.end().read_exact(&mut body).expect("message body");
        Some(Message::parse(&header, &body).expect("parse controller message"))
    }

    pub fn recv(&mut self) -> (u32, Message) {
        self.try_recv().expect("controller closed the channel")
    }

    /// Complete Hello and features exchange; returns the flows installed on connect, the
    /// table-miss rule first.
    pub fn handshake(&mut self) -> Vec<FlowMod> {
        match self.recv() {
            (_, Message::Hello(hello)) => assert!(hello.supports_ours(0x04)),
            (_, other) => panic!("expected Hello, got {:?}", other),
        }
        self.send(Message::Hello(Hello::ours()));
        let xid = match self.recv() {
            (xid, Message::FeaturesReq) => xid,
            (_, other) => panic!("expected FeaturesReq, got {:?}", other),
        };
        self.send_with_xid(xid, Message::FeaturesReply(features(self.dpid)));
        let mut installed = vec![self.expect_flow_mod()];
        installed.extend(flow_mods(&self.barrier()));
        installed
    }

    pub fn send_packet_in(&mut self, in_port: u32, buffer_id: Option<u32>, frame: Vec<u8>) {
        let total_len = frame.len() as u16;
        let input_payload = match buffer_id {
            Some(id) => Payload::Buffered(id, frame),
            None => Payload::NotBuffered(frame),
        };
        self.send(Message::PacketIn(PacketIn {
            input_payload,
            total_len,
            port: in_port,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
        }));
    }

    pub fn expect_flow_mod(&mut self) -> FlowMod {
        match self.recv() {
            (_, Message::FlowMod(fm)) => fm,
            (_, other) => panic!("expected FlowMod, got {:?}", other),
        }
    }

    /// Echo round trip. Returns everything the controller sent before the reply.
    pub fn barrier(&mut self) -> Vec<Message> {
        let xid = self.send(Message::EchoRequest(b"barrier".to_vec()));
        let mut seen = vec![];
        loop {
            match self.recv() {
                (id, Message::EchoReply(data)) if id == xid => {
                    assert_eq!(data, b"barrier".to_vec());
                    return seen;
                }
                (_, msg) => seen.push(msg),
            }
        }
    }

    /// Packet-in followed by a barrier: the controller's full response to one frame.
    pub fn exchange(&mut self, in_port: u32, buffer_id: Option<u32>, frame: Vec<u8>) -> Vec<Message> {
        self.send_packet_in(in_port, buffer_id, frame);
        self.barrier()
    }

    /// Stop reading while keeping the write half open, so controller sends fail.
    pub fn close_read(&mut self) {
        self.end().close_read();
    }

    /// Close the channel and wait for the controller to finish the session.
    pub fn disconnect(mut self) -> ofp_firewall::Result<()> {
        self.end.take();
        self.join()
    }

    /// Wait for the controller side to end the session on its own.
    pub fn join(&mut self) -> ofp_firewall::Result<()> {
        self.session
            .take()
            .expect("session already joined")
            .join()
            .expect("session thread panicked")
    }
}

pub fn flow_mods(msgs: &[Message]) -> Vec<FlowMod> {
    msgs.iter()
        .filter_map(|m| match m {
            Message::FlowMod(fm) => Some(fm.clone()),
            _ => None,
        })
        .collect()
}

pub fn packet_outs(msgs: &[Message]) -> Vec<PacketOut> {
    msgs.iter()
        .filter_map(|m| match m {
            Message::PacketOut(po) => Some(po.clone()),
            _ => None,
        })
        .collect()
}

pub fn mac(last: u8) -> MacAddr {
    MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, last])
}

pub fn host_ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn ethernet(dst: MacAddr, src: MacAddr, ethertype: u16) -> Vec<u8> {
    let mut f = vec![];
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&ethertype.to_be_bytes());
    f
}

/// Minimal ICMP-over-IPv4 frame.
pub fn ipv4_frame(src: MacAddr, dst: MacAddr, sip: Ipv4Addr, dip: Ipv4Addr) -> Vec<u8> {
    let mut f = ethernet(dst, src, 0x0800);
    f.extend_from_slice(&[0x45, 0x00, 0x00, 28, 0x00, 0x01, 0x40, 0x00, 64, 1, 0x00, 0x00]);
    f.extend_from_slice(&sip.octets());
    f.extend_from_slice(&dip.octets());
    f.extend_from_slice(&[8, 0, 0, 0, 0, 1, 0, 1]);
    f
}

pub fn arp_request(src: MacAddr, sip: Ipv4Addr, tip: Ipv4Addr) -> Vec<u8> {
    let mut f = ethernet(MacAddr::BROADCAST, src, 0x0806);
    f.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&sip.octets());
    f.extend_from_slice(&[0; 6]);
    f.extend_from_slice(&tip.octets());
    f
}

pub fn arp_reply(src: MacAddr, sip: Ipv4Addr, dst: MacAddr, dip: Ipv4Addr) -> Vec<u8> {
    let mut f = ethernet(dst, src, 0x0806);
    f.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 2]);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&sip.octets());
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&dip.octets());
    f
}

/// A frame of any ethertype with an opaque payload.
pub fn raw_frame(src: MacAddr, dst: MacAddr, ethertype: u16) -> Vec<u8> {
    let mut f = ethernet(dst, src, ethertype);
    f.extend_from_slice(&[0x60, 0, 0, 0, 0, 0, 58, 64]);
    f
}

pub fn lldp_frame(src: MacAddr) -> Vec<u8> {
    let mut f = ethernet(MacAddr([0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e]), src, 0x88cc);
    // chassis id TLV, port id TLV, TTL TLV, end
    f.extend_from_slice(&[0x02, 0x07, 0x04]);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&[0x04, 0x02, 0x07, 0x01, 0x06, 0x02, 0x00, 0x78, 0x00, 0x00]);
    f
}
