// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print engine state in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both tooling and integration tests.

use crate::engine::filter::Chain;
use crate::engine::filter::RuleSet;
use crate::engine::route::Fib;
use crate::engine::stat::Ipv4StatsSnap;
use std::io::Write;
use std::string::String;
use tabwriter::TabWriter;

/// Print an [`Ipv4StatsSnap`].
pub fn print_stats(snap: &Ipv4StatsSnap) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), snap)
}

/// Print an [`Ipv4StatsSnap`].
pub fn print_stats_into(
    writer: &mut impl Write,
    snap: &Ipv4StatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "COUNTER\tVALUE")?;
    write_hr(&mut t)?;
    for (name, val) in snap.pairs() {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()
}

/// Print the routes of a [`Fib`].
pub fn print_routes(fib: &Fib) -> std::io::Result<()> {
    print_routes_into(&mut std::io::stdout(), fib)
}

/// Print the routes of a [`Fib`].
pub fn print_routes_into(
    writer: &mut impl Write,
    fib: &Fib,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "DESTINATION\tGATEWAY\tDEVICE\tMTU\tMETRIC")?;
    write_hr(&mut t)?;
    for r in fib.iter() {
        let gw = match r.gateway {
            Some(gw) => gw.to_string(),
            None => String::from("*"),
        };
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}",
            r.dst,
            gw,
            r.dev.name(),
            r.dev.mtu(),
            r.metric
        )?;
    }
    t.flush()
}

/// Print the rules of every chain of a [`RuleSet`].
pub fn print_rules_into(
    writer: &mut impl Write,
    rules: &RuleSet,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    for chain in [Chain::Input, Chain::Output, Chain::Forward] {
        writeln!(t, "Chain {chain}")?;
        write_hr(&mut t)?;
        writeln!(t, "ID\tRULE")?;
        for (i, rule) in rules.rules(chain).iter().enumerate() {
            writeln!(t, "{i}\t{rule}")?;
        }
        writeln!(t)?;
    }
    t.flush()
}

fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<50}", "")
}
