//! The vector-mode document controller: revision selection across
//! `{Local, Remote_i}`, put policy, conflict resolution.

use strata_model::{Error, PeerId, RemoteId, Version, VersionOrder, VersionVector};
use strata_store::body::{encode_dict, parse_dict, validate_body, Dict};
use strata_store::{ContentLevel, DocumentFlags, KeyStore, Record, Transaction};
use tracing::{debug, info, warn};

use crate::put::{PutBody, PutRequest, SaveResult};
use crate::revision::Revision;
use crate::vector_record::VectorRecord;
use crate::Result;

/// A document controller over the version-vector scheme.
///
/// `selected` is a cursor over the stored revisions: the local one
/// (`RemoteId::LOCAL`) and one per remote. The local revision is the only
/// leaf unless a remote revision is in conflict.
pub struct VectorDocument<'s> {
    doc: VectorRecord<'s>,
    my_peer: PeerId,
    selected: Option<RemoteId>,
}

impl<'s> VectorDocument<'s> {
    pub fn open(store: &'s KeyStore, key: &str, content: ContentLevel) -> Result<VectorDocument<'s>> {
        let doc = VectorRecord::open(store, key, content)?;
        Ok(VectorDocument::new(doc, store.my_peer()))
    }

    pub fn from_record(store: &'s KeyStore, record: Record) -> Result<VectorDocument<'s>> {
        let doc = VectorRecord::from_record(store, record)?;
        Ok(VectorDocument::new(doc, store.my_peer()))
    }

    fn new(doc: VectorRecord<'s>, my_peer: PeerId) -> VectorDocument<'s> {
        let mut this = VectorDocument { doc, my_peer, selected: None };
        this.select_remote(RemoteId::LOCAL);
        this
    }

    // ---- Accessors:

    pub fn record(&self) -> &VectorRecord<'s> {
        &self.doc
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn sequence(&self) -> u64 {
        self.doc.sequence()
    }

    pub fn flags(&self) -> DocumentFlags {
        self.doc.doc_flags()
    }

    /// The current revision's vector in relative ASCII (local peer as `*`).
    pub fn rev_id_ascii(&self) -> Result<Option<String>> {
        if self.doc.rev_id().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.doc.current_vector()?.as_ascii(PeerId::ME)))
    }

    // ---- Selection:

    fn parse_version(&self, rev_id: &str) -> Result<Version> {
        Version::parse_ascii(rev_id, self.my_peer).map_err(|_| Error::BadRevisionId.into())
    }

    /// Locate a stored revision by ASCII form: a full vector (contains `,`)
    /// matches by exact binary equality, a single version matches any
    /// stored vector that starts with it.
    fn find_remote(&self, rev_id: &str) -> Result<Option<RemoteId>> {
        let mut remote = Some(RemoteId::LOCAL);
        if rev_id.contains(',') {
            let vers = VersionVector::from_ascii(rev_id, self.my_peer)
                .map_err(|_| Error::BadRevisionId)?;
            let binary = vers.as_binary(PeerId::ME)?;
            while let Some(r) = remote {
                if let Some(rev) = self.doc.remote_revision(r) {
                    if rev.rev_id == binary {
                        return Ok(Some(r));
                    }
                }
                remote = self.doc.next_remote_id(r);
            }
        } else {
            let vers = self.parse_version(rev_id)?;
            while let Some(r) = remote {
                if let Some(rev) = self.doc.remote_revision(r) {
                    if !rev.rev_id.is_empty() && rev.version()? == vers {
                        return Ok(Some(r));
                    }
                }
                remote = self.doc.next_remote_id(r);
            }
        }
        Ok(None)
    }

    fn select_remote(&mut self, remote: RemoteId) -> bool {
        match self.doc.remote_revision(remote) {
            Some(rev) if !rev.rev_id.is_empty() => {
                self.selected = Some(remote);
                true
            }
            _ => {
                self.selected = None;
                false
            }
        }
    }

    /// Select a revision by ASCII vector or single version.
    pub fn select_revision(&mut self, rev_id: &str) -> Result<bool> {
        match self.find_remote(rev_id)? {
            Some(remote) => Ok(self.select_remote(remote)),
            None => {
                self.selected = None;
                Ok(false)
            }
        }
    }

    pub fn select_current_revision(&mut self) -> bool {
        self.select_remote(RemoteId::LOCAL)
    }

    pub fn select_next_revision(&mut self) -> bool {
        match self.selected {
            Some(cur) => match self.doc.next_remote_id(cur) {
                Some(next) => self.select_remote(next),
                None => {
                    self.selected = None;
                    false
                }
            },
            None => false,
        }
    }

    /// Advance to the next leaf revision. Only the local revision and
    /// conflicting remote revisions are leaves here.
    pub fn select_next_leaf_revision(&mut self, _include_deleted: bool) -> bool {
        while self.select_next_revision() {
            if self.selected_is_leaf() {
                return true;
            }
        }
        false
    }

    pub fn selected_remote(&self) -> Option<RemoteId> {
        self.selected
    }

    pub fn selected_revision(&self) -> Option<&Revision> {
        self.selected.and_then(|r| self.doc.remote_revision(r))
    }

    pub fn selected_is_leaf(&self) -> bool {
        match self.selected {
            Some(RemoteId::LOCAL) => true,
            Some(_) => self.selected_revision().is_some_and(Revision::is_conflicted),
            None => false,
        }
    }

    /// The selected revision's vector in relative ASCII.
    pub fn selected_rev_id_ascii(&self) -> Result<Option<String>> {
        match self.selected_revision() {
            Some(rev) => Ok(Some(rev.vector()?.as_ascii(PeerId::ME))),
            None => Ok(None),
        }
    }

    /// The selected revision's body bytes.
    pub fn selected_body(&self) -> Option<Vec<u8>> {
        self.selected_revision().map(|rev| encode_dict(&rev.properties))
    }

    /// The selected revision's history as an ASCII vector bound to this
    /// database's peer ID, optionally truncated to `max_revs` versions.
    /// `max_revs == 0` leaves the local peer unbound (`*`), an escape hatch
    /// used by tests to get stable output.
    pub fn selected_rev_history(&self, max_revs: usize) -> Result<Option<String>> {
        let Some(rev) = self.selected_revision() else {
            return Ok(None);
        };
        let mut vers = rev.vector()?;
        if max_revs > 0 && vers.count() > max_revs {
            vers.limit_count(max_revs);
        }
        let bind = if max_revs > 0 { self.my_peer } else { PeerId::ME };
        Ok(Some(vers.as_ascii(bind)))
    }

    // ---- Remote ancestors:

    pub fn remote_ancestor_rev_id(&self, remote: RemoteId) -> Result<Option<String>> {
        match self.doc.remote_revision(remote) {
            Some(rev) if !rev.rev_id.is_empty() => Ok(Some(rev.vector()?.as_ascii(PeerId::ME))),
            _ => Ok(None),
        }
    }

    /// Pin `remote`'s last-known revision. If `rev_id` names a stored
    /// revision its whole entry is pinned; otherwise a bare entry with just
    /// the vector is created.
    pub fn set_remote_ancestor_rev_id(&mut self, remote: RemoteId, rev_id: &str) -> Result<()> {
        if remote.is_local() {
            return Err(Error::InvalidParameter("cannot pin the local revision slot").into());
        }
        let revision = match self.find_remote(rev_id)? {
            Some(found) => self.doc.remote_revision(found).cloned().unwrap_or_default(),
            None => {
                let rev_id = if rev_id.contains(',') {
                    VersionVector::from_ascii(rev_id, self.my_peer)
                        .map_err(|_| Error::BadRevisionId)?
                        .as_binary(PeerId::ME)?
                } else {
                    let vers = self.parse_version(rev_id)?;
                    let mut vv = VersionVector::new();
                    vv.push_back(vers)?;
                    vv.as_binary(PeerId::ME)?
                };
                Revision { rev_id, ..Revision::default() }
            }
        };
        self.doc.set_remote_revision(remote, Some(revision))
    }

    // ---- Updating:

    fn revision_flags(req: &PutRequest<'_>) -> DocumentFlags {
        let mut flags = DocumentFlags::empty();
        if req.deleted {
            flags |= DocumentFlags::DELETED;
        }
        if req.has_attachments {
            flags |= DocumentFlags::HAS_ATTACHMENTS;
        }
        flags
    }

    /// Resolve a put request's body to properties, applying a delta if the
    /// request carries one.
    fn new_properties(&mut self, body: &PutBody<'_>) -> Result<Dict> {
        let bytes = match body {
            PutBody::Bytes(Some(b)) if !b.is_empty() => b.to_vec(),
            PutBody::Bytes(_) => return Ok(Dict::new()),
            PutBody::Delta { source_rev, delta, apply } => {
                if !self.select_revision(source_rev)? {
                    return Err(Error::DeltaBaseUnknown.into());
                }
                let source = self.selected_body().ok_or(Error::DeltaBaseUnknown)?;
                apply(&source, delta)?
            }
        };
        validate_body(&bytes)?;
        Ok(parse_dict(&bytes, false)?)
    }

    fn save_if_requested(&mut self, req: &PutRequest<'_>, txn: Option<&mut Transaction>) -> Result<()> {
        if !req.save {
            return Ok(());
        }
        let txn = txn.ok_or(Error::NotInTransaction)?;
        match self.doc.save(txn)? {
            SaveResult::Conflict => Err(Error::Conflict.into()),
            _ => Ok(()),
        }
    }

    /// Apply a local edit: bump the local peer's generation and replace the
    /// current revision.
    pub fn put_new(&mut self, req: &PutRequest<'_>, txn: Option<&mut Transaction>) -> Result<()> {
        let mut new_vers = self.doc.current_vector()?;
        new_vers.increment_gen(PeerId::ME)?;

        let properties = self.new_properties(&req.body)?;
        let rev_id = new_vers.as_binary(PeerId::ME)?;
        debug!(key = self.doc.key(), version = %new_vers, "putting new revision");

        self.doc.set_current_revision(Revision {
            rev_id,
            properties,
            flags: Self::revision_flags(req),
        });
        self.select_remote(RemoteId::LOCAL);
        self.save_if_requested(req, txn)
    }

    /// Apply a replicated revision per its causal order against the current
    /// one. Returns the common-ancestor index the replicator expects: 0 when
    /// the revision was already known, 1 when it advanced the document.
    pub fn put_existing(&mut self, req: &PutRequest<'_>, txn: Option<&mut Transaction>) -> Result<usize> {
        let properties = self.new_properties(&req.body)?;
        let new_vers = VersionVector::read_history(req.history, self.my_peer)?;
        let mut new_rev = Revision {
            rev_id: new_vers.as_binary(PeerId::ME)?,
            properties,
            flags: Self::revision_flags(req),
        };

        let order = if self.doc.exists() && !self.doc.rev_id().is_empty() {
            new_vers.compare_to(&self.doc.current_vector()?)
        } else {
            VersionOrder::Newer
        };

        let mut common_ancestor = 1;
        match order {
            VersionOrder::Same | VersionOrder::Older => {
                // Already have this revision; the local one stands.
                debug!(key = self.doc.key(), version = %new_vers, %order, "put-existing is stale");
                common_ancestor = 0;
            }
            VersionOrder::Newer => {
                debug!(key = self.doc.key(), version = %new_vers, "put-existing advances document");
                self.doc.set_current_revision(new_rev.clone());
            }
            VersionOrder::Conflicting => {
                if req.remote.is_local() {
                    warn!(key = self.doc.key(), version = %new_vers, "local put-existing conflicts");
                    return Err(Error::Conflict.into());
                }
                info!(
                    key = self.doc.key(),
                    version = %new_vers,
                    remote = %req.remote,
                    "put-existing conflicts; recording on remote only"
                );
                new_rev.flags |= DocumentFlags::CONFLICTED;
            }
        }

        if !req.remote.is_local() {
            // A revision from a remote is, by definition, that remote's
            // latest revision; record it regardless of the causal order.
            self.doc.set_remote_revision(req.remote, Some(new_rev))?;
        }
        self.select_remote(req.remote);
        self.save_if_requested(req, txn)?;
        Ok(common_ancestor)
    }

    /// Resolve a conflict between the local revision and a conflicting
    /// remote revision. The merged revision gets the union of both vectors
    /// with the local generation bumped; its body is `merged_body` when
    /// given, else the winner's.
    pub fn resolve_conflict(
        &mut self,
        winning_rev_id: &str,
        losing_rev_id: &str,
        merged_body: Option<&[u8]>,
        merged_flags: DocumentFlags,
    ) -> Result<()> {
        let won = self.find_remote(winning_rev_id)?.ok_or(Error::NotFound)?;
        let lost = self.find_remote(losing_rev_id)?.ok_or(Error::NotFound)?;
        if won == lost {
            return Err(Error::InvalidParameter("those are the same revision").into());
        }
        // One side must be local, the other a conflicting remote:
        let (remote, local_won) = if won.is_local() {
            (lost, true)
        } else if lost.is_local() {
            (won, false)
        } else {
            return Err(Error::InvalidParameter("neither revision is local").into());
        };
        let local_rev = self.doc.current_revision().clone();
        let mut remote_rev = self
            .doc
            .remote_revision(remote)
            .cloned()
            .ok_or(Error::NotFound)?;
        if !remote_rev.is_conflicted() {
            return Err(Error::Conflict.into());
        }

        let local_vers = local_rev.vector()?;
        let remote_vers = remote_rev.vector()?;
        let mut merged_vers = local_vers.merged_with(&remote_vers);
        merged_vers.increment_gen(PeerId::ME)?;

        let properties = match merged_body {
            Some(body) => {
                validate_body(body)?;
                parse_dict(body, false)?
            }
            None if local_won => local_rev.properties.clone(),
            None => remote_rev.properties.clone(),
        };
        self.doc.set_current_revision(Revision {
            rev_id: merged_vers.as_binary(PeerId::ME)?,
            properties,
            flags: merged_flags
                & (DocumentFlags::DELETED | DocumentFlags::HAS_ATTACHMENTS),
        });

        remote_rev.flags -= DocumentFlags::CONFLICTED;
        self.doc.set_remote_revision(remote, Some(remote_rev))?;
        self.select_remote(RemoteId::LOCAL);

        info!(
            key = self.doc.key(),
            local = %local_vers,
            remote = %remote_vers,
            merged = %merged_vers,
            "resolved conflict"
        );
        Ok(())
    }

    pub fn save(&mut self, txn: &mut Transaction) -> Result<SaveResult> {
        self.doc.save(txn)
    }
}
