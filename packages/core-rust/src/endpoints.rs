//! Order-preserving set-union merge of affiliate endpoint lists.
//!
//! An affiliate learns its reachable endpoints incrementally (IPv4 vs IPv6,
//! tunnel vs direct), so a partial update must never lose an endpoint that
//! was published earlier. Endpoints are opaque byte blobs; equality is exact
//! byte equality.

use std::collections::HashSet;

/// Merges two endpoint lists into a left-biased, duplicate-free union.
///
/// Existing entries keep their relative order; incoming entries that were
/// not already present follow in incoming order. Duplicates within either
/// input are collapsed to their first occurrence.
#[must_use]
pub fn merge_endpoints<T>(existing: &[T], incoming: &[T]) -> Vec<T>
where
    T: AsRef<[u8]> + Clone,
{
    let mut seen: HashSet<&[u8]> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for endpoint in existing.iter().chain(incoming) {
        if seen.insert(endpoint.as_ref()) {
            merged.push(endpoint.clone());
        }
    }

    merged
}
