//! Change-detection fingerprint for events.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

use crate::types::EventData;

/// Fingerprint the fields that decide whether the remote copy is stale.
///
/// Only `summary`, `start`, `end`, `description` and `location` take part.
/// Attendees and timezone changes alone never trigger a remote write. The
/// fields are serialised as compact JSON with sorted keys, so the digest does
/// not depend on struct layout.
pub fn compute_hash(event: &EventData) -> String {
    let mut fields: BTreeMap<&str, Option<String>> = BTreeMap::new();
    fields.insert("summary", Some(event.summary.clone()));
    fields.insert("start", Some(event.start.canonical()));
    fields.insert("end", Some(event.end.canonical()));
    fields.insert("description", event.description.clone());
    fields.insert("location", event.location.clone());

    // A map of strings always serialises.
    let canonical = serde_json::to_string(&fields).unwrap_or_default();
    hex::encode(Md5::digest(canonical.as_bytes()))
}
