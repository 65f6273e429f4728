//! Property-based tests for learning, forwarding and the block set.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ofp_firewall::firewall::{BlockPair, FirewallPolicy, NonIpv4Policy};
use ofp_firewall::firewall_switch::FirewallSwitch;
use ofp_firewall::flow_installer::FlowInstaller;
use ofp_firewall::mac_table::MacLearningTable;
use ofp_firewall::ofp_controller::openflow0x04::OF0x04Controller;
use ofp_firewall::openflow0x04::message::Message;
use ofp_firewall::openflow0x04::{Action, PacketIn, PacketInReason, Payload, PseudoPort};
use ofp_firewall::packet::MacAddr;
use proptest::prelude::*;

// A handful of switches and hosts so that sequences collide often
fn learn_op_strategy() -> impl Strategy<Value = (u64, u8, u32)> {
    (1u64..=3, 0u8..8, 1u32..=48)
}

fn mac_of(host: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, host])
}

fn ipv4_frame(src: MacAddr, dst: MacAddr, sip: Ipv4Addr, dip: Ipv4Addr) -> Vec<u8> {
    let mut f = vec![];
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&[0x08, 0x00]);
    f.extend_from_slice(&[0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0]);
    f.extend_from_slice(&sip.octets());
    f.extend_from_slice(&dip.octets());
    f
}

fn packet_in(port: u32, buffer_id: Option<u32>, frame: Vec<u8>) -> PacketIn {
    PacketIn {
        total_len: frame.len() as u16,
        input_payload: match buffer_id {
            Some(id) => Payload::Buffered(id, frame),
            None => Payload::NotBuffered(frame),
        },
        port,
        reason: PacketInReason::NoMatch,
        table_id: 0,
        cookie: 0,
    }
}

#[test]
fn prop_last_write_wins() {
    proptest!(|(ops in prop::collection::vec(learn_op_strategy(), 1..64))| {
        let table = MacLearningTable::new();
        let mut expected = HashMap::new();
        for &(sw, host, port) in &ops {
            table.learn(sw, mac_of(host), port);
            expected.insert((sw, host), port);
        }
        for sw in 1u64..=3 {
            for host in 0u8..8 {
                prop_assert_eq!(table.lookup(sw, &mac_of(host)), expected.get(&(sw, host)).copied());
            }
        }
    });
}

#[test]
fn prop_unknown_destination_floods() {
    proptest!(|(
        src in 0u8..8,
        dst in 8u8..16,
        port in 1u32..=48,
        sip in any::<u32>(),
        dip in any::<u32>(),
        buffer in prop::option::of(0u32..0xffff_fff0)
    )| {
        let app = FirewallSwitch::new(FirewallPolicy::default(), FlowInstaller::default());
        let frame = ipv4_frame(mac_of(src), mac_of(dst), Ipv4Addr::from(sip), Ipv4Addr::from(dip));
        let msgs = app.packet_in(1, 0, packet_in(port, buffer, frame));
        let flood = vec![Action::Output(PseudoPort::Flood)];
        match &msgs[0] {
            Message::FlowMod(fm) => {
                prop_assert_eq!(fm.priority, 10);
                prop_assert_eq!(fm.pattern.in_port, Some(port));
                prop_assert_eq!(&fm.actions(), &flood);
                prop_assert_eq!(fm.apply_to_packet, buffer);
            }
            other => prop_assert!(false, "expected flood rule, got {:?}", other),
        }
        // a buffered packet is replayed by the rule, an unbuffered one is sent out
        prop_assert_eq!(msgs.len(), if buffer.is_some() { 1 } else { 2 });
        if let Some(Message::PacketOut(po)) = msgs.get(1) {
            prop_assert_eq!(&po.apply_actions, &flood);
            prop_assert_eq!(po.output_payload.buffer_id(), None);
        }
    });
}

#[test]
fn prop_blocked_pairs_only_drop() {
    proptest!(|(
        sip in any::<u32>(),
        dip in any::<u32>(),
        known_dst in any::<bool>(),
        buffer in prop::option::of(0u32..0xffff_fff0),
        drop_priority in 11u16..=u16::MAX
    )| {
        let (sip, dip) = (Ipv4Addr::from(sip), Ipv4Addr::from(dip));
        let installer = FlowInstaller::new(&ofp_firewall::config::FlowConfig {
            drop_priority,
            ..Default::default()
        });
        let app = FirewallSwitch::new(
            FirewallPolicy::new([BlockPair::new(sip, dip)], NonIpv4Policy::Allow),
            installer,
        );
        if known_dst {
            app.learning().learn(1, mac_of(2), 7);
        }
        let frame = ipv4_frame(mac_of(1), mac_of(2), sip, dip);
        let msgs = app.packet_in(1, 0, packet_in(3, buffer, frame));
        prop_assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::FlowMod(fm) => {
                prop_assert!(fm.priority > 10);
                prop_assert!(fm.instructions.is_empty());
                prop_assert_eq!(fm.pattern.ipv4_src, Some(sip));
                prop_assert_eq!(fm.pattern.ipv4_dst, Some(dip));
                prop_assert_eq!(fm.apply_to_packet, buffer);
            }
            other => prop_assert!(false, "expected drop rule, got {:?}", other),
        }
    });
}
