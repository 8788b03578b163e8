//! Bulk ancestry lookup for replication handshakes: given target revisions
//! per document, report what this database already has.

use std::collections::HashSet;

use strata_model::{RemoteId, Version, VersionOrder, VersionVector};
use strata_store::KeyStore;

use crate::revision::for_each_rev_id;
use crate::Result;

/// A stored revision is equal to or newer than the target, and the
/// remote-pinned revision matches the target.
pub const ANCESTOR_EXISTS: &str = "1";

/// A stored revision covers the target, but the remote's pinned revision is
/// a different one (the remote is out of date about us).
pub const ANCESTOR_EXISTS_NOT_CURRENT: &str = "2";

/// For each `(doc_id, target_rev)` pair, produce one of the status
/// sentinels, or a JSON array of up to `max_ancestors` distinct ASCII
/// vectors strictly older than the target (candidate ancestors the remote
/// could send a delta against).
///
/// `must_have_bodies` is accepted for interface parity; vector-mode records
/// store properties for every revision they keep, so it never filters.
pub fn find_doc_ancestors(
    store: &KeyStore,
    docs: &[(&str, &str)],
    max_ancestors: usize,
    _must_have_bodies: bool,
    remote: RemoteId,
) -> Result<Vec<String>> {
    let my_peer = store.my_peer();
    let keys: Vec<&str> = docs.iter().map(|(doc_id, _)| *doc_id).collect();

    let mut index = 0usize;
    let results = store.with_doc_bodies(&keys, |record| {
        let (_, target) = docs[index];
        index += 1;

        let vers = VersionVector::from_ascii(target, my_peer)?;
        // A one-element vector compares as a single version:
        let single: Option<&Version> = if vers.count() == 1 {
            vers.current()
        } else {
            None
        };
        let compare = |stored: &VersionVector| match single {
            Some(v) => stored.compare_to_version(v),
            None => stored.compare_to(&vers),
        };

        // Is some stored revision equal to or newer than the target?
        let mut found = false;
        let mut not_current = false;
        for_each_rev_id(record, |rev_id, rev_remote| {
            let stored = VersionVector::from_binary(rev_id)?;
            let cmp = compare(&stored);
            if cmp == VersionOrder::Same || cmp == VersionOrder::Newer {
                found = true;
            }
            if cmp != VersionOrder::Same && !remote.is_local() && rev_remote == remote {
                not_current = true;
            }
            Ok(())
        })
        .map_err(to_store_error)?;

        if found {
            let status = if not_current { ANCESTOR_EXISTS_NOT_CURRENT } else { ANCESTOR_EXISTS };
            return Ok(status.as_bytes().to_vec());
        }

        // Otherwise, list distinct stored vectors strictly older than the
        // target, as candidate ancestors:
        let mut ancestors: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for_each_rev_id(record, |rev_id, _| {
            if ancestors.len() >= max_ancestors {
                return Ok(());
            }
            let stored = VersionVector::from_binary(rev_id)?;
            if compare(&stored) == VersionOrder::Older {
                let ascii = stored.as_ascii(my_peer);
                if seen.insert(ascii.clone()) {
                    ancestors.push(ascii);
                }
            }
            Ok(())
        })
        .map_err(to_store_error)?;

        Ok(serde_json::to_vec(&ancestors).expect("string arrays always serialize"))
    })?;

    Ok(results
        .into_iter()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect())
}

fn to_store_error(err: crate::DocError) -> strata_store::StoreError {
    match err {
        crate::DocError::Store(e) => e,
        crate::DocError::Model(e) => strata_store::StoreError::Model(e),
        crate::DocError::Insert(_) => {
            strata_store::StoreError::Model(strata_model::Error::CorruptRevisionData)
        }
    }
}
