use std::{cmp::Ordering, fmt};

use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};

use super::{eth, snap};

pub const BASE_PROTOCOL_VERSION: u64 = 5;

/// Message codes below this offset belong to the base protocol.
pub const BASE_PROTOCOL_LENGTH: u64 = 0x10;

pub const HELLO: u64 = 0x00;
pub const DISCONNECT: u64 = 0x01;
pub const PING: u64 = 0x02;
pub const PONG: u64 = 0x03;

#[derive(Clone, Debug, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct Capability {
    pub name: String,
    pub version: u64,
}

impl Capability {
    pub fn new(name: &str, version: u64) -> Self {
        Self {
            name: name.to_owned(),
            version,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// First message on every connection, sent by both sides.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Hello {
    pub protocol_version: u64,
    pub client_id: String,
    pub capabilities: Vec<Capability>,
    pub node_id: B256,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Disconnect {
    pub reason: u64,
}

/// A sub-protocol both sides speak, placed in the shared message-code space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedCapability {
    pub name: String,
    pub version: u64,
    pub offset: u64,
    pub length: u64,
}

impl SharedCapability {
    pub fn contains(&self, code: u64) -> bool {
        code >= self.offset && code < self.offset + self.length
    }
}

/// Number of message codes a known sub-protocol occupies.
pub fn protocol_length(name: &str) -> Option<u64> {
    match name {
        eth::PROTOCOL_NAME => Some(eth::PROTOCOL_LENGTH),
        snap::PROTOCOL_NAME => Some(snap::PROTOCOL_LENGTH),
        _ => None,
    }
}

/// Intersects both capability lists. Each protocol is kept once at the highest
/// version both sides advertise; unknown protocols are ignored. The result is
/// ordered by name and laid out consecutively after the base protocol.
pub fn match_capabilities(local: &[Capability], remote: &[Capability]) -> Vec<SharedCapability> {
    let mut best: Vec<&Capability> = Vec::new();

    for cap in local.iter().filter(|cap| remote.contains(cap)) {
        if protocol_length(&cap.name).is_none() {
            continue;
        }
        match best.iter_mut().find(|known| known.name == cap.name) {
            Some(known) if known.version < cap.version => *known = cap,
            Some(_) => {}
            None => best.push(cap),
        }
    }

    best.sort_by(|a, b| match a.name.cmp(&b.name) {
        Ordering::Equal => a.version.cmp(&b.version),
        other => other,
    });

    let mut offset = BASE_PROTOCOL_LENGTH;
    best.into_iter()
        .filter_map(|cap| {
            let length = protocol_length(&cap.name)?;
            let shared = SharedCapability {
                name: cap.name.clone(),
                version: cap.version,
                offset,
                length,
            };
            offset += length;
            Some(shared)
        })
        .collect()
}
