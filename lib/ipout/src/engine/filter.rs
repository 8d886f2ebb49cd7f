// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The filter gate.
//!
//! The output path only consumes a verdict; how that verdict is
//! reached belongs to the [`PacketFilter`] implementation. [`RuleSet`]
//! is a small first-match rule list over the IPv4 header for
//! integrators and tests.

use super::packet::Packet;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use ipout_api::Ipv4Addr;
use ipout_api::Ipv4Cidr;
use ipout_api::Protocol;
use serde::Deserialize;
use serde::Serialize;

/// The hook point a packet is being filtered at.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Chain {
    Input,
    Output,
    Forward,
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::Forward => "FORWARD",
        };
        write!(f, "{s}")
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Verdict {
    Accept,
    Drop,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
        };
        write!(f, "{s}")
    }
}

pub trait PacketFilter: Send + Sync {
    /// Decide the fate of `pkt` at `chain`, falling back to `default`
    /// when nothing more specific applies.
    fn verdict(&self, chain: Chain, default: Verdict, pkt: &Packet) -> Verdict;
}

/// A filter which never says anything but the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl PacketFilter for AcceptAll {
    fn verdict(
        &self,
        _chain: Chain,
        default: Verdict,
        _pkt: &Packet,
    ) -> Verdict {
        default
    }
}

/// The header fields a predicate can look at.
#[derive(Clone, Copy, Debug)]
pub struct FilterMeta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: Protocol,
}

impl FilterMeta {
    pub fn from_pkt(pkt: &Packet) -> Option<Self> {
        let ip = pkt.ipv4().ok()?;
        Some(Self { src: ip.src(), dst: ip.dst(), proto: ip.proto() })
    }
}

/// A condition on the IPv4 header. A list matches if any of its
/// members does.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Predicate {
    SrcIp4(Vec<Ipv4Cidr>),
    DstIp4(Vec<Ipv4Cidr>),
    IpProto(Vec<Protocol>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn is_match(&self, meta: &FilterMeta) -> bool {
        match self {
            Self::SrcIp4(list) => list.iter().any(|c| c.is_member(meta.src)),
            Self::DstIp4(list) => list.iter().any(|c| c.is_member(meta.dst)),
            Self::IpProto(list) => list.contains(&meta.proto),
            Self::Not(pred) => !pred.is_match(meta),
        }
    }
}

fn join<T: ToString>(list: &[T]) -> String {
    list.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(",")
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SrcIp4(list) => write!(f, "ip.src={}", join(list)),
            Self::DstIp4(list) => write!(f, "ip.dst={}", join(list)),
            Self::IpProto(list) => write!(f, "ip.proto={}", join(list)),
            Self::Not(pred) => write!(f, "!{pred}"),
        }
    }
}

/// A rule matches when all of its predicates do; a rule without
/// predicates matches everything.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Rule {
    pub preds: Vec<Predicate>,
    pub verdict: Verdict,
}

impl Rule {
    pub fn new(verdict: Verdict) -> Self {
        Self { preds: vec![], verdict }
    }

    pub fn add_predicate(&mut self, pred: Predicate) {
        self.preds.push(pred);
    }

    pub fn is_match(&self, meta: &FilterMeta) -> bool {
        self.preds.iter().all(|p| p.is_match(meta))
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.preds.is_empty() {
            return write!(f, "* -> {}", self.verdict);
        }
        write!(f, "{} -> {}", join(&self.preds), self.verdict)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct ChainRules {
    rules: Vec<Rule>,
    default: Option<Verdict>,
}

/// An ordered, first-match rule list per chain.
///
/// A chain without a default of its own uses the default the caller
/// passes in. Packets whose header cannot be read also get the
/// default.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RuleSet {
    input: ChainRules,
    output: ChainRules,
    forward: ChainRules,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self, chain: Chain) -> &ChainRules {
        match chain {
            Chain::Input => &self.input,
            Chain::Output => &self.output,
            Chain::Forward => &self.forward,
        }
    }

    fn chain_mut(&mut self, chain: Chain) -> &mut ChainRules {
        match chain {
            Chain::Input => &mut self.input,
            Chain::Output => &mut self.output,
            Chain::Forward => &mut self.forward,
        }
    }

    /// Append a rule to the end of `chain`.
    pub fn add_rule(&mut self, chain: Chain, rule: Rule) {
        self.chain_mut(chain).rules.push(rule);
    }

    pub fn set_default(&mut self, chain: Chain, verdict: Verdict) {
        self.chain_mut(chain).default = Some(verdict);
    }

    pub fn rules(&self, chain: Chain) -> &[Rule] {
        &self.chain(chain).rules
    }
}

impl PacketFilter for RuleSet {
    fn verdict(&self, chain: Chain, default: Verdict, pkt: &Packet) -> Verdict {
        let rules = self.chain(chain);
        let default = rules.default.unwrap_or(default);

        let Some(meta) = FilterMeta::from_pkt(pkt) else {
            return default;
        };

        rules
            .rules
            .iter()
            .find(|r| r.is_match(&meta))
            .map(|r| r.verdict)
            .unwrap_or(default)
    }
}
