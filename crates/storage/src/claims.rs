//! Chain claims
//!
//! A chain may only be extended by one writer. Each process that starts or
//! takes over a chain records a claim; a later process may reuse a chain
//! whose most recent claimant has exited.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;

use prost::Message;
use tracing::debug;

use gink_core::proto::ClaimBuilder;
use gink_core::{encode_muts, Chain, MuTimestamp, Result};

use crate::kv::{Direction, ReadTxn, Table, WriteTxn};

/// Claim on `chain` by the current process.
pub(crate) fn new_claim(chain: Chain, claim_time: MuTimestamp) -> ClaimBuilder {
    ClaimBuilder {
        medallion: chain.medallion,
        chain_start: chain.chain_start,
        process_id: i64::from(std::process::id()),
        claim_time,
    }
}

/// Record a claim.
pub(crate) fn record_claim(txn: &mut impl WriteTxn, claim: &ClaimBuilder) -> Result<()> {
    txn.put(
        Table::Claims,
        &encode_muts(claim.claim_time),
        &claim.encode_to_vec(),
    )
}

/// Every claim, oldest first.
pub(crate) fn claims(txn: &impl ReadTxn) -> Result<Vec<ClaimBuilder>> {
    let mut found = Vec::new();
    txn.walk_prefix(Table::Claims, &[], Direction::Forward, &mut |_, value| {
        found.push(ClaimBuilder::decode(value)?);
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found)
}

/// Whether process `pid` is still running.
///
/// Without a `/proc` filesystem every process is assumed alive, so chains
/// are never reused.
pub(crate) fn process_is_alive(pid: i64) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

/// A chain with `identity` whose last claimant is gone, if any.
pub(crate) fn reusable_chain(txn: &impl ReadTxn, identity: &str) -> Result<Option<Chain>> {
    let own_pid = i64::from(std::process::id());
    let mut latest: HashMap<Chain, ClaimBuilder> = HashMap::new();
    for claim in claims(txn)? {
        latest.insert(Chain::new(claim.medallion, claim.chain_start), claim);
    }
    let mut candidates: Vec<_> = latest.into_values().collect();
    candidates.sort_by_key(|c| std::cmp::Reverse(c.claim_time));
    for claim in candidates {
        if claim.process_id == own_pid || process_is_alive(claim.process_id) {
            continue;
        }
        let chain = Chain::new(claim.medallion, claim.chain_start);
        match txn.get(Table::Identities, &chain.to_bytes())? {
            Some(stored) if stored == identity.as_bytes() => {
                debug!(%chain, pid = claim.process_id, "reusing chain of exited process");
                return Ok(Some(chain));
            }
            _ => continue,
        }
    }
    Ok(None)
}
