//! In-place upgrade of stored documents between versioning schemes.

use std::collections::BTreeMap;

use strata_model::{Error, PeerId, RemoteId, Version, VersionVector};
use strata_revtree::{RevFlags, RevIdx, RevTree};
use strata_store::body::{encode_dict, parse_dict, Dict};
use strata_store::{DocumentFlags, KeyStore, Record, RecordUpdate, Transaction};
use tracing::{info, warn};

use crate::put::SaveResult;
use crate::revision::{encode_remotes, Revision};
use crate::tree_doc::TreeDocument;
use crate::{DocError, Result};

/// The versioning schemes a database can store documents under, oldest
/// first. Upgrades only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Versioning {
    /// Rev-trees in the original record schema.
    TreeV2,
    /// Rev-trees with tree data in the record "extra" column.
    TreeV3,
    /// Version vectors.
    Vectors,
}

impl Versioning {
    fn name(self) -> &'static str {
        match self {
            Versioning::TreeV2 => "v2 rev-trees",
            Versioning::TreeV3 => "v3 rev-trees",
            Versioning::Vectors => "version vectors",
        }
    }
}

/// Transform every stored document from `cur` to `new`, within `txn`.
///
/// Downgrades fail with `Unimplemented`; read-only and no-upgrade stores
/// fail with `CantUpgradeDatabase`. A corrupt record is logged and skipped
/// without aborting the batch. Returns the number of documents upgraded.
pub fn upgrade_document_versioning(
    store: &KeyStore,
    cur: Versioning,
    new: Versioning,
    txn: &mut Transaction,
) -> Result<u64> {
    if new == cur {
        return Ok(0);
    }
    if new < cur {
        return Err(Error::Unimplemented("cannot downgrade document versioning").into());
    }
    if store.read_only() || store.no_upgrade() {
        return Err(Error::CantUpgradeDatabase.into());
    }

    info!(from = cur.name(), to = new.name(), "upgrading stored documents");

    let mut records = Vec::new();
    store.enumerate(|record| {
        records.push(record);
        Ok(true)
    })?;

    let mut doc_count = 0u64;
    for record in records {
        let key = record.key.clone();
        let outcome = if new == Versioning::Vectors {
            upgrade_to_vectors(store, record, txn)
        } else {
            resave_tree(store, record, txn)
        };
        match outcome {
            Ok(()) => doc_count += 1,
            Err(DocError::Model(Error::CorruptRevisionData)) => {
                warn!(key = %key, "skipping document with corrupt revision data");
            }
            Err(err) => return Err(err),
        }
    }

    info!(doc_count, "documents upgraded");
    Ok(doc_count)
}

/// Rewrite one rev-tree record as a version-vector record.
fn upgrade_to_vectors(store: &KeyStore, record: Record, txn: &mut Transaction) -> Result<()> {
    let key = record.key.clone();
    let flags = record.flags;
    let sequence = record.sequence;
    let mut doc = TreeDocument::from_record(store, record)?;

    let Some(current) = doc.tree_mut().current() else {
        warn!(key = %key, "skipping empty revision tree");
        return Ok(());
    };
    let tree = doc.tree();
    let remote_rev = tree.latest_revision_on_remote(RemoteId::DEFAULT);
    let base = remote_rev.and_then(|r| tree.common_ancestor(current, r));

    // Synthesize the vector: the remote base generation under the legacy
    // peer, plus any generations we authored past it under "me".
    let current_gen = tree.rev(current).rev_id().generation();
    let mut vv = VersionVector::new();
    let mut local_changes = current_gen;
    if let Some(base) = base {
        let base_gen = tree.rev(base).rev_id().generation();
        vv.add(Version::new(base_gen, PeerId::LEGACY)?);
        local_changes = current_gen.saturating_sub(base_gen);
    }
    if local_changes > 0 {
        vv.add(Version::new(local_changes, PeerId::ME)?);
    }
    let binary_version = vv.as_binary(PeerId::ME)?;

    // Propagate saved remote revisions into the new record shape:
    let (body, extra) = if tree.remote_revisions().is_empty() {
        let body = tree.rev(current).body().map_or_else(Vec::new, |b| b.to_vec());
        (body, Vec::new())
    } else {
        encode_upgraded_remotes(tree, current, &binary_version)?
    };

    let update = RecordUpdate {
        key: &key,
        flags,
        body: &body,
        extra: &extra,
        version: &binary_version,
        sequence,
        update_sequence: false,
    };
    store.set(&update, txn)?;

    info!(key = %key, version = %vv, "upgraded document");
    Ok(())
}

/// Build the vector-mode body and "extra" for a tree with remote pointers.
fn encode_upgraded_remotes(
    tree: &RevTree,
    current: RevIdx,
    binary_version: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let current_revision = Revision {
        rev_id: binary_version.to_vec(),
        properties: tree_rev_properties(tree, current)?,
        flags: tree_rev_flags(tree, current),
    };

    let mut remotes = BTreeMap::new();
    for (&remote, &idx) in tree.remote_revisions() {
        let revision = if idx == current {
            current_revision.clone()
        } else {
            // A historical generation gets a one-element legacy vector.
            let gen = tree.rev(idx).rev_id().generation();
            let mut vv = VersionVector::new();
            vv.push_back(Version::new(gen, PeerId::LEGACY)?)?;
            Revision {
                rev_id: vv.as_binary(PeerId::ME)?,
                properties: tree_rev_properties(tree, idx)?,
                flags: tree_rev_flags(tree, idx),
            }
        };
        remotes.insert(remote, revision);
    }

    Ok((encode_dict(&current_revision.properties), encode_remotes(&remotes)))
}

fn tree_rev_properties(tree: &RevTree, idx: RevIdx) -> Result<Dict> {
    match tree.rev(idx).body() {
        Some(body) => Ok(parse_dict(body, true)?),
        None => Ok(Dict::new()),
    }
}

fn tree_rev_flags(tree: &RevTree, idx: RevIdx) -> DocumentFlags {
    let rev = tree.rev(idx);
    let mut flags = DocumentFlags::empty();
    if rev.is_deleted() {
        flags |= DocumentFlags::DELETED;
    }
    if rev.flags().contains(RevFlags::HAS_ATTACHMENTS) {
        flags |= DocumentFlags::HAS_ATTACHMENTS;
    }
    flags
}

/// Rewrite one rev-tree record in the current record schema (a same-scheme
/// storage upgrade).
fn resave_tree(store: &KeyStore, record: Record, txn: &mut Transaction) -> Result<()> {
    let key = record.key.clone();
    let mut doc = TreeDocument::from_record(store, record)?;
    doc.tree_mut().set_changed(true);
    let depth = doc.tree().prune_depth();
    let result = doc.save(depth, txn)?;
    debug_assert!(matches!(result, SaveResult::NoNewSequence | SaveResult::NoSave));
    info!(key = %key, "re-saved rev-tree document");
    Ok(())
}
