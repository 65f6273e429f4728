//! Forwarding decisions and the flow rules and packets that carry them out.

use std::net::Ipv4Addr;

use crate::config::FlowConfig;
use crate::firewall::{BlockPair, FirewallVerdict};
use crate::mac_table::{DatapathId, PortNo};
use crate::openflow0x04::message::{add_flow, Message};
use crate::openflow0x04::{
    Action, FlowMod, PacketOut, Pattern, Payload, PseudoPort, OFPCML_NO_BUFFER,
};
use crate::packet::{ether_types, MacAddr};

/// Priority of the table-miss rule.
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Outcome of the forwarding pipeline for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    Drop,
    Output(PortNo),
    Flood,
}

impl ForwardDecision {
    /// Firewall first, then the learned location, then flood.
    pub fn decide(verdict: FirewallVerdict, learned: Option<PortNo>) -> ForwardDecision {
        match (verdict, learned) {
            (FirewallVerdict::Block, _) => ForwardDecision::Drop,
            (FirewallVerdict::Allow, Some(port)) => ForwardDecision::Output(port),
            (FirewallVerdict::Allow, None) => ForwardDecision::Flood,
        }
    }

    fn actions(&self) -> Vec<Action> {
        match *self {
            ForwardDecision::Drop => vec![],
            ForwardDecision::Output(port) => vec![Action::Output(PseudoPort::PhysicalPort(port))],
            ForwardDecision::Flood => vec![Action::Output(PseudoPort::Flood)],
        }
    }
}

/// What a flow rule does with matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Output(PseudoPort),
    Drop,
    ToController,
}

/// A match/action entry destined for a switch flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRule {
    pub pattern: Pattern,
    pub priority: u16,
    pub action: RuleAction,
    pub buffer_id: Option<u32>,
}

impl FlowRule {
    pub fn into_flow_mod(self) -> FlowMod {
        let actions = match self.action {
            RuleAction::Output(port) => vec![Action::Output(port)],
            RuleAction::Drop => vec![],
            RuleAction::ToController => vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
        };
        let mut fm = add_flow(self.priority, self.pattern, actions);
        fm.apply_to_packet = self.buffer_id;
        fm
    }
}

/// Everything the installer needs to know about the packet that triggered a decision.
#[derive(Debug, Clone, Copy)]
pub struct PacketContext<'a> {
    pub sw: DatapathId,
    pub in_port: PortNo,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    /// Ethertype after any VLAN tag.
    pub eth_type: u16,
    pub ips: Option<(Ipv4Addr, Ipv4Addr)>,
    pub payload: &'a Payload,
}

#[derive(Debug, Clone)]
pub struct FlowInstaller {
    forward_priority: u16,
    drop_priority: u16,
    install_flood_rules: bool,
}

impl Default for FlowInstaller {
    fn default() -> Self {
        Self::new(&FlowConfig::default())
    }
}

impl FlowInstaller {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            forward_priority: config.forward_priority,
            drop_priority: config.drop_priority,
            install_flood_rules: config.install_flood_rules,
        }
    }

    pub fn forward_priority(&self) -> u16 {
        self.forward_priority
    }

    pub fn drop_priority(&self) -> u16 {
        self.drop_priority
    }

    /// Match-all rule at priority 0 that sends every unmatched packet to the controller.
    pub fn table_miss(&self) -> FlowRule {
        FlowRule {
            pattern: Pattern::match_all(),
            priority: TABLE_MISS_PRIORITY,
            action: RuleAction::ToController,
            buffer_id: None,
        }
    }

    /// Drop rule for one blocked pair, independent of ports and MACs. Pushed when a switch
    /// connects so that no forwarding rule can carry the pair.
    pub fn block_rule(&self, pair: &BlockPair) -> FlowRule {
        FlowRule {
            pattern: Pattern {
                eth_type: Some(ether_types::IPV4),
                ipv4_src: Some(pair.src),
                ipv4_dst: Some(pair.dst),
                ..Pattern::match_all()
            },
            priority: self.drop_priority,
            action: RuleAction::Drop,
            buffer_id: None,
        }
    }

    /// The rule that pins `decision` for this packet's flow, if one should be installed.
    pub fn rule_for(&self, ctx: &PacketContext<'_>, decision: ForwardDecision) -> Option<FlowRule> {
        let mut pattern = Pattern {
            in_port: Some(ctx.in_port),
            eth_src: Some(ctx.src_mac),
            eth_dst: Some(ctx.dst_mac),
            ..Pattern::match_all()
        };
        let (priority, action) = match decision {
            ForwardDecision::Drop => {
                pattern.eth_type = Some(ctx.eth_type);
                if let Some((src, dst)) = ctx.ips {
                    pattern.ipv4_src = Some(src);
                    pattern.ipv4_dst = Some(dst);
                }
                (self.drop_priority, RuleAction::Drop)
            }
            ForwardDecision::Output(port) => (
                self.forward_priority,
                RuleAction::Output(PseudoPort::PhysicalPort(port)),
            ),
            ForwardDecision::Flood if self.install_flood_rules => {
                (self.forward_priority, RuleAction::Output(PseudoPort::Flood))
            }
            ForwardDecision::Flood => return None,
        };
        Some(FlowRule {
            pattern,
            priority,
            action,
            buffer_id: ctx.payload.buffer_id(),
        })
    }

    /// Messages carrying out `decision`: the flow rule, plus a packet-out when the switch
    /// holds no buffer the rule could release.
    pub fn install(&self, ctx: &PacketContext<'_>, decision: ForwardDecision) -> Vec<Message> {
        let mut out = vec![];
        let rule = self.rule_for(ctx, decision);
        let buffer_released = rule.map(|r| r.buffer_id.is_some()).unwrap_or(false);
        if let Some(rule) = rule {
            out.push(Message::FlowMod(rule.into_flow_mod()));
        }
        if decision == ForwardDecision::Drop || buffer_released {
            return out;
        }
        out.push(Message::PacketOut(PacketOut {
            output_payload: ctx.payload.clone(),
            port_id: Some(ctx.in_port),
            apply_actions: decision.actions(),
        }));
        out
    }
}
