//! Pairwise IPv4 block policy.
//!
//! The block set is read on every packet and replaced wholesale: readers clone
//! an `Arc` to the current set and never observe a partially applied update.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;

use crate::error::Error;

/// An ordered `(source, destination)` pair whose traffic is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct BlockPair {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl BlockPair {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self { src, dst }
    }
}

impl fmt::Display for BlockPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Parses `SRC,DST`, the form accepted on the command line.
impl FromStr for BlockPair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (src, dst) = s
            .split_once(',')
            .ok_or_else(|| Error::Config(format!("expected SRC,DST, got {:?}", s)))?;
        let parse = |ip: &str| {
            ip.trim()
                .parse::<Ipv4Addr>()
                .map_err(|e| Error::Config(format!("invalid IPv4 address {:?}: {}", ip, e)))
        };
        Ok(BlockPair::new(parse(src)?, parse(dst)?))
    }
}

/// What to do with frames that carry no IPv4 pair to check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonIpv4Policy {
    /// Fail-open: non-IPv4 traffic is forwarded.
    #[default]
    Allow,
    /// Fail-closed: non-IPv4 traffic is dropped.
    Deny,
}

/// Firewall verdict for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallVerdict {
    Allow,
    Block,
}

#[derive(Debug)]
pub struct FirewallPolicy {
    blocked: RwLock<Arc<HashSet<BlockPair>>>,
    non_ipv4: NonIpv4Policy,
}

impl Default for FirewallPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), NonIpv4Policy::default())
    }
}

impl FirewallPolicy {
    pub fn new<I>(pairs: I, non_ipv4: NonIpv4Policy) -> Self
    where
        I: IntoIterator<Item = BlockPair>,
    {
        Self {
            blocked: RwLock::new(Arc::new(pairs.into_iter().collect())),
            non_ipv4,
        }
    }

    /// The block set currently in force.
    pub fn snapshot(&self) -> Arc<HashSet<BlockPair>> {
        let guard = self.blocked.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// True iff the ordered pair is in the block set.
    pub fn is_blocked(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        self.snapshot().contains(&BlockPair::new(src, dst))
    }

    /// Verdict for a frame. `None` means the frame is not IPv4 and the non-IPv4 policy applies.
    pub fn evaluate(&self, pair: Option<(Ipv4Addr, Ipv4Addr)>) -> FirewallVerdict {
        match pair {
            Some((src, dst)) if self.is_blocked(src, dst) => FirewallVerdict::Block,
            Some(_) => FirewallVerdict::Allow,
            None => match self.non_ipv4 {
                NonIpv4Policy::Allow => FirewallVerdict::Allow,
                NonIpv4Policy::Deny => FirewallVerdict::Block,
            },
        }
    }

    /// Publish a new block set, replacing the old one in a single swap.
    pub fn replace<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = BlockPair>,
    {
        let next: Arc<HashSet<BlockPair>> = Arc::new(pairs.into_iter().collect());
        let mut guard = self.blocked.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}
