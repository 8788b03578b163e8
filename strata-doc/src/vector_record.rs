//! The vector-mode record wrapper: the current revision plus the per-remote
//! revision map, loaded from and saved to a key store record.

use std::collections::BTreeMap;

use strata_model::{Error, PeerId, RemoteId, VersionVector};
use strata_store::body::{encode_dict, parse_dict, Dict};
use strata_store::{ContentLevel, DocumentFlags, KeyStore, Record, RecordUpdate, Transaction};
use tracing::debug;

use crate::put::SaveResult;
use crate::revision::{decode_remotes, encode_remotes, Revision};
use crate::Result;

/// A document under the version-vector scheme.
///
/// The record's `version` column holds the current revision's binary vector
/// and its `body` column the current properties; `extra` holds the remote
/// revision map (see [`crate::revision`]).
pub struct VectorRecord<'s> {
    store: &'s KeyStore,
    key: String,
    sequence: u64,
    doc_flags: DocumentFlags,
    current: Revision,
    remotes: BTreeMap<RemoteId, Revision>,
    content: ContentLevel,
    exists: bool,
    changed: bool,
    rev_id_changed: bool,
    properties_changed: bool,
}

impl<'s> VectorRecord<'s> {
    pub fn open(store: &'s KeyStore, key: &str, content: ContentLevel) -> Result<VectorRecord<'s>> {
        let record = store.get(key, content)?;
        VectorRecord::from_record(store, record)
    }

    /// Wrap an already-read record.
    pub fn from_record(store: &'s KeyStore, record: Record) -> Result<VectorRecord<'s>> {
        let mut current = Revision {
            rev_id: record.version.clone(),
            properties: Dict::new(),
            flags: record.flags
                & (DocumentFlags::DELETED | DocumentFlags::HAS_ATTACHMENTS),
        };
        let mut remotes = BTreeMap::new();
        if record.exists {
            if record.content >= ContentLevel::CurrentRev && !record.body.is_empty() {
                current.properties = parse_dict(&record.body, true)?;
            }
            if record.content >= ContentLevel::Entire {
                remotes = decode_remotes(&record.extra)?;
            }
        }

        let mut doc = VectorRecord {
            store,
            key: record.key,
            sequence: record.sequence,
            doc_flags: record.flags - DocumentFlags::SYNCED,
            current,
            remotes,
            content: record.content,
            exists: record.exists,
            changed: false,
            rev_id_changed: false,
            properties_changed: false,
        };

        // The SYNCED flag is a fast-path marker meaning "the current
        // revision was pushed to the default remote". Fold it into the
        // remote map now that the record is fully loaded.
        if record.flags.contains(DocumentFlags::SYNCED)
            && record.content >= ContentLevel::Entire
        {
            doc.set_remote_revision(RemoteId::DEFAULT, Some(doc.current.clone()))?;
            doc.changed = false;
        }
        Ok(doc)
    }

    // ---- Accessors:

    pub fn store(&self) -> &'s KeyStore {
        self.store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn doc_flags(&self) -> DocumentFlags {
        self.doc_flags
    }

    pub fn content(&self) -> ContentLevel {
        self.content
    }

    /// The current revision's binary version vector (empty for a new doc).
    pub fn rev_id(&self) -> &[u8] {
        &self.current.rev_id
    }

    /// The current revision's vector, or an empty vector for a new doc.
    pub fn current_vector(&self) -> Result<VersionVector> {
        if self.current.rev_id.is_empty() {
            Ok(VersionVector::new())
        } else {
            Ok(VersionVector::from_binary(&self.current.rev_id)?)
        }
    }

    pub fn current_revision(&self) -> &Revision {
        &self.current
    }

    /// A revision by slot; `RemoteId::LOCAL` addresses the current one.
    pub fn remote_revision(&self, remote: RemoteId) -> Option<&Revision> {
        if remote.is_local() {
            Some(&self.current)
        } else {
            self.remotes.get(&remote)
        }
    }

    /// The next occupied remote slot after `remote`, in ascending order.
    pub fn next_remote_id(&self, remote: RemoteId) -> Option<RemoteId> {
        self.remotes
            .range(RemoteId(remote.0 + 1)..)
            .next()
            .map(|(&r, _)| r)
    }

    pub fn remote_revisions(&self) -> &BTreeMap<RemoteId, Revision> {
        &self.remotes
    }

    // ---- Mutation:

    /// Replace the current (local) revision.
    pub fn set_current_revision(&mut self, rev: Revision) {
        if rev.rev_id != self.current.rev_id {
            self.current.rev_id = rev.rev_id;
            self.rev_id_changed = true;
            self.changed = true;
        }
        if rev.properties != self.current.properties {
            self.current.properties = rev.properties;
            self.properties_changed = true;
            self.changed = true;
        }
        if rev.flags != self.current.flags {
            self.current.flags = rev.flags;
            self.changed = true;
        }
        self.update_doc_flags();
    }

    /// Writes against a partially-loaded record would clobber the remote
    /// revisions that were never read; refuse them.
    fn require_remotes(&self) -> Result<()> {
        if self.exists && self.content < ContentLevel::Entire {
            return Err(Error::InvalidParameter("document's remote revisions are not loaded").into());
        }
        Ok(())
    }

    /// Create, update, or (with `None`) remove a remote's revision.
    pub fn set_remote_revision(&mut self, remote: RemoteId, rev: Option<Revision>) -> Result<()> {
        if remote.is_local() {
            let rev = rev.ok_or(Error::InvalidParameter("cannot remove the local revision"))?;
            self.set_current_revision(rev);
            return Ok(());
        }
        self.require_remotes()?;
        match rev {
            Some(rev) => {
                if rev.rev_id.is_empty() {
                    return Err(Error::CorruptRevisionData.into());
                }
                if self.remotes.get(&remote) != Some(&rev) {
                    self.remotes.insert(remote, rev);
                    self.changed = true;
                }
            }
            None => {
                if self.remotes.remove(&remote).is_some() {
                    self.changed = true;
                }
            }
        }
        self.update_doc_flags();
        Ok(())
    }

    /// Roll document flags up from the stored revisions: the local
    /// revision's own flags, plus `CONFLICTED`/`HAS_ATTACHMENTS` contributed
    /// by any remote.
    fn update_doc_flags(&mut self) {
        let mut flags = self.current.flags
            & (DocumentFlags::DELETED | DocumentFlags::HAS_ATTACHMENTS);
        for rev in self.remotes.values() {
            flags |= rev.flags & (DocumentFlags::CONFLICTED | DocumentFlags::HAS_ATTACHMENTS);
        }
        self.doc_flags = flags;
    }

    pub fn changed(&self) -> bool {
        self.changed || self.properties_changed
    }

    // ---- Saving:

    /// Encode the record body and "extra" columns.
    pub fn encode_body_and_extra(&self) -> (Vec<u8>, Vec<u8>) {
        (encode_dict(&self.current.properties), encode_remotes(&self.remotes))
    }

    /// Save within `txn`.
    ///
    /// A property change without an explicit revision ID gets a generated
    /// one: the current vector with the local peer's generation bumped.
    pub fn save(&mut self, txn: &mut Transaction) -> Result<SaveResult> {
        let new_revision = self.properties_changed || self.current.rev_id.is_empty();
        if !new_revision && !self.changed {
            return Ok(SaveResult::NoSave);
        }
        self.require_remotes()?;

        if new_revision && !self.rev_id_changed {
            let mut vv = self.current_vector()?;
            vv.increment_gen(PeerId::ME)?;
            self.current.rev_id = vv.as_binary(PeerId::ME)?;
            self.rev_id_changed = true;
            debug!(key = %self.key, version = %vv, "generated version");
        }

        let (body, extra) = self.encode_body_and_extra();
        let update_sequence = self.sequence == 0 || self.rev_id_changed;
        let update = RecordUpdate {
            key: &self.key,
            flags: self.doc_flags,
            body: &body,
            extra: &extra,
            version: &self.current.rev_id,
            sequence: self.sequence,
            update_sequence,
        };
        let sequence = self.store.set(&update, txn)?;
        if sequence == 0 {
            return Ok(SaveResult::Conflict);
        }

        self.sequence = sequence;
        self.exists = true;
        self.changed = false;
        self.rev_id_changed = false;
        self.properties_changed = false;
        Ok(if update_sequence {
            SaveResult::NewSequence
        } else {
            SaveResult::NoNewSequence
        })
    }
}
