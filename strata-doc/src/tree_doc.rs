//! The rev-tree document controller: a selection cursor over a [`RevTree`],
//! put of local and replicated revisions, digest rev-ID generation, save.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use strata_model::{digest, Error, RemoteId, RevId};
use strata_revtree::{Inserted, RevFlags, RevIdx, RevTree};
use strata_store::{ContentLevel, DocumentFlags, KeyStore, Record, RecordUpdate, Transaction};
use tracing::debug;

use crate::put::SaveResult;
use crate::Result;

static LEGACY_REV_IDS: AtomicBool = AtomicBool::new(false);

/// Switch generated revision IDs to the legacy MD5 scheme, process-wide.
/// Exists only for binary compatibility with pre-versioned stores.
pub fn generate_legacy_rev_ids(enabled: bool) {
    LEGACY_REV_IDS.store(enabled, Ordering::Relaxed);
}

/// Derive a new revision ID from the parent and the body.
///
/// The digest input is the length-prefixed parent rev ID (binary form), one
/// deletion byte, and the body. The legacy scheme uses MD5 and skips the
/// length prefix when there is no parent, a faithful reproduction of the
/// historical algorithm, bugs included.
pub fn generate_rev_id(body: &[u8], parent: Option<&RevId>, deleted: bool) -> Result<RevId> {
    let parent_bytes = parent.map_or(&[][..], |p| p.as_bytes());
    let parent_bytes = &parent_bytes[..parent_bytes.len().min(255)];
    let rev_len = [parent_bytes.len() as u8];
    let del_byte = [u8::from(deleted)];

    let digest: Vec<u8> = if LEGACY_REV_IDS.load(Ordering::Relaxed) {
        if parent_bytes.is_empty() {
            digest::md5(&[&del_byte, body]).to_vec()
        } else {
            digest::md5(&[&rev_len, parent_bytes, &del_byte, body]).to_vec()
        }
    } else {
        digest::sha1(&[&rev_len, parent_bytes, &del_byte, body]).to_vec()
    };

    let generation = match parent {
        Some(p) => p.generation() + 1,
        None => 1,
    };
    Ok(RevId::from_digest(generation, &digest)?)
}

/// Outcome of a tree-mode put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePut {
    pub rev_id: RevId,
    /// 201 for a creation, 200 for a deletion or an idempotent re-insert.
    pub status: u16,
}

/// A document under the rev-tree scheme.
pub struct TreeDocument<'s> {
    store: &'s KeyStore,
    key: String,
    flags: DocumentFlags,
    sequence: u64,
    exists: bool,
    tree: RevTree,
    selected: Option<RevIdx>,
}

impl<'s> TreeDocument<'s> {
    pub fn open(store: &'s KeyStore, key: &str, content: ContentLevel) -> Result<TreeDocument<'s>> {
        let record = store.get(key, content)?;
        TreeDocument::from_record(store, record)
    }

    /// Wrap an already-read record.
    pub fn from_record(store: &'s KeyStore, record: Record) -> Result<TreeDocument<'s>> {
        let tree = if !record.exists {
            RevTree::new()
        } else if record.content >= ContentLevel::Entire {
            let body = (!record.body.is_empty()).then(|| record.body.clone());
            RevTree::decode(&record.extra, body, record.sequence)?
        } else {
            RevTree::unloaded()
        };
        let mut doc = TreeDocument {
            store,
            key: record.key,
            flags: record.flags,
            sequence: record.sequence,
            exists: record.exists,
            tree,
            selected: None,
        };
        if !doc.tree.is_unknown() {
            doc.select_current_revision();
        }
        Ok(doc)
    }

    // ---- Accessors:

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn flags(&self) -> DocumentFlags {
        self.flags
    }

    pub fn tree(&self) -> &RevTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut RevTree {
        &mut self.tree
    }

    /// The current revision's ID, after sorting.
    pub fn current_rev_id(&mut self) -> Option<RevId> {
        let current = self.tree.current()?;
        Some(self.tree.rev(current).rev_id().clone())
    }

    // ---- Selection:

    pub fn selected(&self) -> Option<RevIdx> {
        self.selected
    }

    pub fn selected_rev_id(&self) -> Option<&RevId> {
        self.selected.map(|idx| self.tree.rev(idx).rev_id())
    }

    pub fn select_revision(&mut self, rev_id: &RevId) -> bool {
        self.selected = self.tree.get(rev_id);
        self.selected.is_some()
    }

    pub fn select_current_revision(&mut self) -> bool {
        self.selected = self.tree.current();
        self.selected.is_some()
    }

    pub fn select_parent(&mut self) -> bool {
        self.selected = self.selected.and_then(|idx| self.tree.rev(idx).parent());
        self.selected.is_some()
    }

    /// Advance in priority order.
    pub fn select_next(&mut self) -> bool {
        self.selected = self.selected.and_then(|idx| self.tree.next_in_order(idx));
        self.selected.is_some()
    }

    /// Advance to the next leaf, optionally skipping deletions.
    pub fn select_next_leaf(&mut self, include_deleted: bool) -> bool {
        while self.select_next() {
            let rev = self.tree.rev(self.selected.expect("just selected"));
            if rev.is_leaf() && (include_deleted || !rev.is_deleted()) {
                return true;
            }
        }
        false
    }

    /// The selected revision's body. `Gone` when it was pruned away.
    pub fn load_selected_body(&self) -> Result<Bytes> {
        let idx = self.selected.ok_or(Error::NotFound)?;
        match self.tree.rev(idx).body() {
            Some(body) => Ok(body.clone()),
            None => Err(Error::Gone.into()),
        }
    }

    // ---- Updating:

    fn insert_flags(deleted: bool, has_attachments: bool) -> RevFlags {
        let mut flags = RevFlags::empty();
        if deleted {
            flags |= RevFlags::DELETED;
        }
        if has_attachments {
            flags |= RevFlags::HAS_ATTACHMENTS;
        }
        flags
    }

    /// Apply a local edit: derive the child rev ID from the parent and body
    /// and insert it. The parent must be a leaf unless `allow_conflict`.
    pub fn put_new(
        &mut self,
        body: &[u8],
        parent_rev_id: Option<&RevId>,
        deleted: bool,
        has_attachments: bool,
        allow_conflict: bool,
    ) -> Result<TreePut> {
        let rev_id = generate_rev_id(body, parent_rev_id, deleted)?;
        debug!(key = %self.key, rev = %rev_id, "putting new revision");
        let outcome = self.tree.insert(
            rev_id.clone(),
            Some(Bytes::copy_from_slice(body)),
            Self::insert_flags(deleted, has_attachments),
            parent_rev_id,
            allow_conflict,
            false,
        )?;
        let status = match outcome {
            Inserted::Created(idx) => {
                self.selected = Some(idx);
                if deleted {
                    200
                } else {
                    201
                }
            }
            Inserted::Existing => {
                self.select_revision(&rev_id);
                200
            }
        };
        Ok(TreePut { rev_id, status })
    }

    /// Insert a replicated revision with its ancestry (newest first).
    /// Returns the common-ancestor index. Incoming branches are marked as
    /// conflicts; a non-local `remote` gets its pointer moved to the new
    /// revision.
    pub fn put_existing(
        &mut self,
        history: &[&str],
        body: &[u8],
        deleted: bool,
        has_attachments: bool,
        allow_conflict: bool,
        remote: RemoteId,
    ) -> Result<usize> {
        let history: Vec<RevId> = history
            .iter()
            .map(|ascii| RevId::parse_ascii(ascii))
            .collect::<Result<_, _>>()?;
        let common_ancestor = self.tree.insert_history(
            &history,
            Some(Bytes::copy_from_slice(body)),
            Self::insert_flags(deleted, has_attachments),
            allow_conflict,
            true,
        )?;
        if let Some(idx) = self.tree.get(&history[0]) {
            self.selected = Some(idx);
            if !remote.is_local() {
                self.tree.set_latest_revision_on_remote(remote, Some(idx));
            }
        }
        Ok(common_ancestor)
    }

    /// Remove a leaf revision and any ancestors that die with it.
    pub fn purge_revision(&mut self, rev_id: &RevId) -> usize {
        let purged = self.tree.purge(rev_id);
        if purged > 0 && self.selected.is_some() {
            // Indices were compacted; reselect the current revision.
            self.select_current_revision();
        }
        purged
    }

    pub fn latest_revision_on_remote(&self, remote: RemoteId) -> Option<&RevId> {
        let idx = self.tree.latest_revision_on_remote(remote)?;
        Some(self.tree.rev(idx).rev_id())
    }

    pub fn set_latest_revision_on_remote(&mut self, remote: RemoteId, rev_id: Option<&RevId>) -> Result<()> {
        let idx = match rev_id {
            Some(id) => Some(self.tree.get(id).ok_or(Error::NotFound)?),
            None => None,
        };
        self.tree.set_latest_revision_on_remote(remote, idx);
        Ok(())
    }

    /// Roll up record flags from the tree.
    fn record_flags(&mut self) -> DocumentFlags {
        let mut flags = DocumentFlags::empty();
        if let Some(current) = self.tree.current() {
            if self.tree.rev(current).is_deleted() {
                flags |= DocumentFlags::DELETED;
            }
        }
        if self.tree.has_conflict() {
            flags |= DocumentFlags::CONFLICTED;
        }
        for idx in self.tree.in_order().collect::<Vec<_>>() {
            let rev = self.tree.rev(idx);
            if rev.is_leaf() && rev.flags().contains(RevFlags::HAS_ATTACHMENTS) {
                flags |= DocumentFlags::HAS_ATTACHMENTS;
            }
        }
        flags
    }

    /// Prune to `max_depth` and write the record within `txn`.
    pub fn save(&mut self, max_depth: u32, txn: &mut Transaction) -> Result<SaveResult> {
        self.tree.prune(max_depth);
        if !self.tree.changed() {
            return Ok(SaveResult::NoSave);
        }

        if self.tree.is_empty() {
            // Everything was purged; drop the record.
            self.store.purge(&self.key, txn)?;
            self.exists = false;
            self.sequence = 0;
            self.tree.set_changed(false);
            return Ok(SaveResult::NewSequence);
        }

        let (extra, current_body) = self.tree.encode();
        let flags = self.record_flags();
        let current = self.tree.current().expect("non-empty tree has a current revision");
        let version = self.tree.rev(current).rev_id().as_bytes().to_vec();
        let update_sequence = self.tree.has_new_revisions();

        let body = current_body.unwrap_or_default();
        let update = RecordUpdate {
            key: &self.key,
            flags,
            body: &body,
            extra: &extra,
            version: &version,
            sequence: self.sequence,
            update_sequence,
        };
        let sequence = self.store.set(&update, txn)?;
        if sequence == 0 {
            return Ok(SaveResult::Conflict);
        }

        self.tree.saved(sequence);
        self.tree.set_changed(false);
        self.flags = flags;
        self.exists = true;
        let result = if sequence != self.sequence {
            SaveResult::NewSequence
        } else {
            SaveResult::NoNewSequence
        };
        self.sequence = sequence;
        Ok(result)
    }
}
