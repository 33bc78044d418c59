//! Append-only audit log.
//!
//! Events are hash-chained: each one commits to the hash of its predecessor,
//! so an edited or dropped record breaks [`AuditLog::verify`]. Retention
//! pruning only removes from the front and keeps the last pruned hash as the
//! new anchor.
//!
//! Every append is also handed to the configured [`AuditSink`]s.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use keyguard_crypto::blake2b_256;
use keyguard_types::{random_id, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ClientInfo, RbacError, Role};

const GENESIS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Denied,
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Failure => "failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub event_id: String,
    pub timestamp: Timestamp,
    pub actor: String,
    pub role: Option<Role>,
    pub action: String,
    pub resource: String,
    pub result: AuditResult,
    pub detail: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEvent {
    fn compute_hash(&self) -> String {
        let body = serde_json::to_vec(&(
            self.seq,
            &self.event_id,
            self.timestamp,
            &self.actor,
            self.role,
            &self.action,
            &self.resource,
            self.result,
            &self.detail,
            &self.ip_address,
            &self.user_agent,
            &self.prev_hash,
        ))
        .unwrap_or_default();
        hex::encode(blake2b_256(&body))
    }
}

/// What a caller reports; the log fills in sequence, time and hashes.
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub actor: String,
    pub role: Option<Role>,
    pub action: String,
    pub resource: String,
    pub result: AuditResult,
    pub detail: String,
    pub client: ClientInfo,
}

/// Receives every audit event as it is appended.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Mirrors audit events as `tracing` events on target `keyguard::audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        tracing::info!(
            target: "keyguard::audit",
            seq = event.seq,
            actor = %event.actor,
            role = event.role.map(|r| r.as_str()),
            action = %event.action,
            resource = %event.resource,
            result = event.result.as_str(),
            detail = %event.detail,
            "audit_event"
        );
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonLinesAuditSink {
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: &AuditEvent) {
        let result = serde_json::to_vec(event)
            .map_err(io::Error::from)
            .and_then(|mut line| {
                line.push(b'\n');
                self.file.lock().write_all(&line)
            });
        if let Err(e) = result {
            warn!(seq = event.seq, error = %e, "failed to write audit event to file");
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub result: Option<AuditResult>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.since.map_or(true, |t| event.timestamp >= t)
            && self.until.map_or(true, |t| event.timestamp <= t)
            && self.actor.as_ref().map_or(true, |a| *a == event.actor)
            && self.action.as_ref().map_or(true, |a| *a == event.action)
            && self.result.map_or(true, |r| r == event.result)
    }
}

pub struct AuditLog {
    events: VecDeque<AuditEvent>,
    anchor: String,
    next_seq: u64,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self {
            events: VecDeque::new(),
            anchor: GENESIS.to_string(),
            next_seq: 0,
            sinks,
        }
    }

    pub fn append(&mut self, record: AuditRecord, now: Timestamp) -> &AuditEvent {
        let prev_hash = self
            .events
            .back()
            .map_or_else(|| self.anchor.clone(), |e| e.hash.clone());
        let mut event = AuditEvent {
            seq: self.next_seq,
            event_id: random_id(),
            timestamp: now,
            actor: record.actor,
            role: record.role,
            action: record.action,
            resource: record.resource,
            result: record.result,
            detail: record.detail,
            ip_address: record.client.ip_address,
            user_agent: record.client.user_agent,
            prev_hash,
            hash: String::new(),
        };
        event.hash = event.compute_hash();
        self.next_seq += 1;
        for sink in &self.sinks {
            sink.record(&event);
        }
        self.events.push_back(event);
        &self.events[self.events.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Matching events, newest first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Write matching events as JSON lines, oldest first. Returns the count.
    pub fn export_json_lines<W: Write>(&self, query: &AuditQuery, mut out: W) -> io::Result<usize> {
        let mut events = self.query(query);
        events.reverse();
        for event in &events {
            serde_json::to_writer(&mut out, event)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(events.len())
    }

    /// Drop events older than `cutoff`. Returns how many went.
    pub fn prune_before(&mut self, cutoff: Timestamp) -> usize {
        let mut pruned = 0;
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            if let Some(event) = self.events.pop_front() {
                self.anchor = event.hash;
                pruned += 1;
            }
        }
        pruned
    }

    /// Walk the chain from the anchor. Returns the number of events checked.
    pub fn verify(&self) -> Result<usize, RbacError> {
        let mut prev = &self.anchor;
        for event in &self.events {
            if event.prev_hash != *prev || event.hash != event.compute_hash() {
                return Err(RbacError::AuditChainBroken(event.seq));
            }
            prev = &event.hash;
        }
        Ok(self.events.len())
    }

    #[cfg(test)]
    pub(crate) fn event_mut(&mut self, index: usize) -> Option<&mut AuditEvent> {
        self.events.get_mut(index)
    }
}
