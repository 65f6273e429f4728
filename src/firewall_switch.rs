use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::firewall::FirewallPolicy;
use crate::flow_installer::{FlowInstaller, ForwardDecision, PacketContext};
use crate::mac_table::{DatapathId, MacLearningTable};
use crate::ofp_controller::openflow0x04::OF0x04Controller;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{PacketIn, SwitchFeatures};
use crate::packet::Packet;

/// A MAC-learning switch with an IPv4 block list in front of forwarding.
pub struct FirewallSwitch {
    learning: MacLearningTable,
    firewall: FirewallPolicy,
    installer: FlowInstaller,
}

impl FirewallSwitch {
    pub fn new(firewall: FirewallPolicy, installer: FlowInstaller) -> FirewallSwitch {
        FirewallSwitch {
            learning: MacLearningTable::new(),
            firewall,
            installer,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> FirewallSwitch {
        let firewall = FirewallPolicy::new(
            config.firewall.block.iter().copied(),
            config.firewall.non_ipv4,
        );
        FirewallSwitch::new(firewall, FlowInstaller::new(&config.flows))
    }

    pub fn learning(&self) -> &MacLearningTable {
        &self.learning
    }

    pub fn firewall(&self) -> &FirewallPolicy {
        &self.firewall
    }
}

impl OF0x04Controller for FirewallSwitch {
    fn switch_connected(&self, sw: DatapathId, _feats: &SwitchFeatures) -> Vec<Message> {
        let stale = self.learning.drop_partition(sw);
        if stale > 0 {
            debug!(dpid = sw, stale, "discarded learned hosts from previous session");
        }
        let blocks = self.firewall.snapshot();
        let mut greeting = Vec::with_capacity(1 + blocks.len());
        greeting.push(Message::FlowMod(self.installer.table_miss().into_flow_mod()));
        greeting.extend(
            blocks
                .iter()
                .map(|pair| Message::FlowMod(self.installer.block_rule(pair).into_flow_mod())),
        );
        debug!(dpid = sw, blocks = blocks.len(), "pushed table-miss and block rules");
        greeting
    }

    fn switch_disconnected(&self, sw: DatapathId) {
        let forgotten = self.learning.drop_partition(sw);
        debug!(dpid = sw, forgotten, "dropped learning state");
    }

    fn packet_in(&self, sw: DatapathId, xid: u32, pkt: PacketIn) -> Vec<Message> {
        let frame = match Packet::parse(pkt.input_payload.bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(dpid = sw, xid, in_port = pkt.port, error = %e, "discarding malformed frame");
                return vec![];
            }
        };
        if frame.is_lldp() {
            return vec![];
        }

        self.learning.learn(sw, frame.dl_src, pkt.port);

        let ips = frame.ipv4_pair();
        info!(
            dpid = sw,
            in_port = pkt.port,
            src = %frame.dl_src,
            dst = %frame.dl_dst,
            src_ip = ?ips.map(|(src, _)| src),
            dst_ip = ?ips.map(|(_, dst)| dst),
            "packet in"
        );

        let verdict = self.firewall.evaluate(ips);
        let decision = ForwardDecision::decide(verdict, self.learning.lookup(sw, &frame.dl_dst));
        match decision {
            ForwardDecision::Drop => match ips {
                Some((src_ip, dst_ip)) => {
                    info!(dpid = sw, %src_ip, %dst_ip, "blocked by firewall")
                }
                None => info!(dpid = sw, src = %frame.dl_src, "non-IPv4 frame denied"),
            },
            ForwardDecision::Output(port) => {
                debug!(dpid = sw, dst = %frame.dl_dst, port, "forwarding to learned port")
            }
            ForwardDecision::Flood => {
                debug!(dpid = sw, dst = %frame.dl_dst, "destination unknown, flooding")
            }
        }

        let ctx = PacketContext {
            sw,
            in_port: pkt.port,
            src_mac: frame.dl_src,
            dst_mac: frame.dl_dst,
            eth_type: frame.dl_typ,
            ips,
            payload: &pkt.input_payload,
        };
        self.installer.install(&ctx, decision)
    }
}
