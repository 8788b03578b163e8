//! Version vectors: per-peer generation counters in reverse chronological
//! order, with causal comparison and merging.

use std::fmt;

use crate::error::Error;
use crate::peer::PeerId;
use crate::version::{Author, Version, VersionOrder};
use crate::{digest, Result};

/// Leading byte that tags binary data as a version vector rather than a
/// digest-form revision ID.
pub const BINARY_TAG: u8 = 0;

/// An ordered sequence of [`Version`]s, newest first.
///
/// The first element is the most recently authored version (the "current"
/// one). No two elements share an author. Serialized as comma-separated
/// ASCII versions, or as a zero tag byte followed by consecutive binary
/// versions.
#[derive(Debug, Clone, Default)]
pub struct VersionVector {
    vers: Vec<Version>,
    /// ASCII source this vector was parsed from, reusable until a mutation.
    source: Option<String>,
    changed: bool,
}

impl VersionVector {
    pub fn new() -> VersionVector {
        VersionVector::default()
    }

    /// Parse comma-separated ASCII form. A concrete author equal to
    /// `my_peer` is rebound to `ME`.
    pub fn from_ascii(ascii: &str, my_peer: PeerId) -> Result<VersionVector> {
        if ascii.is_empty() {
            return Err(Error::BadVersionVector);
        }
        let mut vv = VersionVector::new();
        for part in ascii.split(',') {
            let vers = Version::parse_ascii(part, my_peer)?;
            vv.check_new_author(vers.author())?;
            vv.vers.push(vers);
        }
        vv.source = Some(ascii.to_owned());
        Ok(vv)
    }

    /// Parse binary form: the tag byte, then varint-packed versions.
    pub fn from_binary(binary: &[u8]) -> Result<VersionVector> {
        let mut data = match binary.split_first() {
            Some((&BINARY_TAG, rest)) => rest,
            _ => return Err(Error::BadVersionVector),
        };
        let mut vv = VersionVector::new();
        while !data.is_empty() {
            let vers = Version::read_binary(&mut data)?;
            vv.check_new_author(vers.author())?;
            vv.vers.push(vers);
        }
        Ok(vv)
    }

    /// Read just the current (first) version from binary form.
    pub fn read_current_from_binary(binary: &[u8]) -> Result<Version> {
        let mut data = match binary.split_first() {
            Some((&BINARY_TAG, rest)) => rest,
            _ => return Err(Error::BadVersionVector),
        };
        Version::read_binary(&mut data)
    }

    /// Parse a replicator history array: entry 0 is a full vector (or a
    /// single version); later entries are single versions, oldest last.
    pub fn read_history(history: &[&str], my_peer: PeerId) -> Result<VersionVector> {
        let Some((first, rest)) = history.split_first() else {
            return Err(Error::BadVersionVector);
        };
        let mut vv = VersionVector::from_ascii(first, my_peer)?;
        for entry in rest {
            if entry.contains(',') {
                return Err(Error::BadVersionVector);
            }
            vv.push_back(Version::parse_ascii(entry, my_peer)?)?;
        }
        Ok(vv)
    }

    // ---- Accessors:

    pub fn count(&self) -> usize {
        self.vers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vers.is_empty()
    }

    /// The most recently authored version.
    pub fn current(&self) -> Option<&Version> {
        self.vers.first()
    }

    pub fn versions(&self) -> &[Version] {
        &self.vers
    }

    /// This vector's generation count for `author`, or 0 if absent.
    pub fn gen_of(&self, author: &Author) -> u64 {
        self.find(author).map_or(0, |i| self.vers[i].gen())
    }

    /// Generation count for a peer, or 0 if absent.
    pub fn gen_of_peer(&self, peer: PeerId) -> u64 {
        self.gen_of(&Author::Peer(peer))
    }

    fn find(&self, author: &Author) -> Option<usize> {
        self.vers.iter().position(|v| v.author() == author)
    }

    fn check_new_author(&self, author: &Author) -> Result<()> {
        if self.find(author).is_some() {
            Err(Error::BadVersionVector)
        } else {
            Ok(())
        }
    }

    fn mutated(&mut self) {
        self.changed = true;
        self.source = None;
    }

    // ---- Comparison:

    /// Compare this vector to another.
    ///
    /// Starts from the element-count difference, then accumulates per-author
    /// `Older`/`Newer` bits; identical first versions short-circuit to
    /// `Same`, and `Older | Newer` terminates the walk as `Conflicting`.
    pub fn compare_to(&self, other: &VersionVector) -> VersionOrder {
        let mut order = match self.count().cmp(&other.count()) {
            std::cmp::Ordering::Less => VersionOrder::Older,
            std::cmp::Ordering::Greater => VersionOrder::Newer,
            std::cmp::Ordering::Equal => VersionOrder::Same,
        };
        for vers in &self.vers {
            let other_gen = other.gen_of(vers.author());
            if vers.gen() < other_gen {
                order = order | VersionOrder::Older;
            } else if vers.gen() > other_gen {
                order = order | VersionOrder::Newer;
            } else if order == VersionOrder::Same {
                break; // first versions identical, so the vectors are equal
            }
            if order == VersionOrder::Conflicting {
                break;
            }
        }
        order
    }

    /// Compare to a single version: older if its author is absent here or
    /// carries a lower generation; same only if it is this vector's head.
    pub fn compare_to_version(&self, vers: &Version) -> VersionOrder {
        match self.find(vers.author()) {
            None => VersionOrder::Older,
            Some(i) if self.vers[i].gen() < vers.gen() => VersionOrder::Older,
            Some(0) if self.vers[0].gen() == vers.gen() => VersionOrder::Same,
            Some(_) => VersionOrder::Newer,
        }
    }

    // ---- Mutation:

    /// Add a version at the end (the oldest position).
    pub fn push_back(&mut self, vers: Version) -> Result<()> {
        self.check_new_author(vers.author())?;
        self.vers.push(vers);
        self.mutated();
        Ok(())
    }

    /// Add a version to the front, removing any older version by the same
    /// author. Returns false (and leaves the vector unchanged) when an
    /// equal-or-newer version by that author is already present.
    pub fn add(&mut self, vers: Version) -> bool {
        if let Some(i) = self.find(vers.author()) {
            if self.vers[i].gen() >= vers.gen() {
                return false;
            }
            self.vers.remove(i);
        }
        self.vers.insert(0, vers);
        self.mutated();
        true
    }

    /// Increment `peer`'s generation (or introduce it at 1) and move it to
    /// the head. Refused on merge markers.
    pub fn increment_gen(&mut self, peer: PeerId) -> Result<()> {
        // Merge markers are unaddressable here: their authors are digests,
        // not peers, so a gen-0 version can never be incremented.
        let author = Author::Peer(peer);
        let vers = match self.find(&author) {
            Some(i) => {
                let old = self.vers.remove(i);
                let gen = old.gen().checked_add(1).ok_or(Error::BadVersionVector)?;
                Version::new(gen, peer)?
            }
            None => Version::new(1, peer)?,
        };
        self.vers.insert(0, vers);
        self.mutated();
        Ok(())
    }

    /// Truncate to the first `max_count` versions.
    pub fn limit_count(&mut self, max_count: usize) {
        if self.vers.len() > max_count {
            self.vers.truncate(max_count);
            self.mutated();
        }
    }

    /// Rewrite the `ME` placeholder to a concrete peer ID.
    pub fn expand_me(&mut self, my_peer: PeerId) {
        if let Some(i) = self.find(&Author::Peer(PeerId::ME)) {
            self.vers[i] = Version::new(self.vers[i].gen(), my_peer)
                .expect("expanding a validated version");
            self.mutated();
        }
    }

    /// Rewrite a concrete `my_peer` back to the `ME` placeholder.
    pub fn compact_me(&mut self, my_peer: PeerId) {
        if let Some(i) = self.find(&Author::Peer(my_peer)) {
            self.vers[i] = Version::new(self.vers[i].gen(), PeerId::ME)
                .expect("compacting a validated version");
            self.mutated();
        }
    }

    /// Prepend a merge marker naming a merged revision: the base64 SHA-1 of
    /// the canonical ASCII form, a NUL byte, and the revision body.
    pub fn insert_merge_rev_id(&mut self, my_peer: PeerId, body: &[u8]) -> Result<()> {
        let canonical = self.canonical_ascii(my_peer);
        let sha = digest::sha1(&[canonical.as_bytes(), &[0u8], body]);
        let marker = Version::merge_marker(digest::base64(&sha))?;
        self.check_new_author(marker.author())?;
        self.vers.insert(0, marker);
        self.mutated();
        Ok(())
    }

    // ---- Merging:

    /// A new vector containing every author from both inputs at the larger
    /// of the two generations. The result order approximates the interleaved
    /// input order; it is deterministic but not sorted.
    pub fn merged_with(&self, other: &VersionVector) -> VersionVector {
        let mut result = VersionVector::new();
        for i in 0..self.vers.len().max(other.vers.len()) {
            if let Some(vers) = self.vers.get(i) {
                if vers.gen() >= other.gen_of(vers.author()) {
                    result.vers.push(vers.clone());
                }
            }
            if let Some(vers) = other.vers.get(i) {
                if vers.gen() > self.gen_of(vers.author()) {
                    result.vers.push(vers.clone());
                }
            }
        }
        result.changed = true;
        result
    }

    // ---- Deltas:

    /// The changes from `base` up to this vector, or `None` when `base` is
    /// not older-or-equal. `a.by_applying_delta(&b.delta_from(&a)?) == b`.
    pub fn delta_from(&self, base: &VersionVector) -> Option<VersionVector> {
        match self.compare_to(base) {
            VersionOrder::Older | VersionOrder::Conflicting => None,
            VersionOrder::Same | VersionOrder::Newer => {
                let mut delta = VersionVector::new();
                for vers in &self.vers {
                    if vers.gen() > base.gen_of(vers.author()) {
                        delta.vers.push(vers.clone());
                    }
                }
                delta.changed = true;
                Some(delta)
            }
        }
    }

    /// Apply a delta produced by [`VersionVector::delta_from`] against this
    /// vector as the base.
    pub fn by_applying_delta(&self, delta: &VersionVector) -> Result<VersionVector> {
        let mut result = VersionVector::new();
        for vers in &delta.vers {
            if vers.gen() <= self.gen_of(vers.author()) {
                return Err(Error::BadVersionVector);
            }
            result.check_new_author(vers.author())?;
            result.vers.push(vers.clone());
        }
        for vers in &self.vers {
            if delta.find(vers.author()).is_none() {
                result.vers.push(vers.clone());
            }
        }
        result.changed = true;
        Ok(result)
    }

    // ---- Conversions:

    /// Binary form: the tag byte, then each version with `ME` bound to
    /// `my_peer`. Fails on merge markers, which have no binary form.
    pub fn as_binary(&self, my_peer: PeerId) -> Result<Vec<u8>> {
        let mut out = vec![BINARY_TAG];
        for vers in &self.vers {
            vers.write_binary(&mut out, my_peer)?;
        }
        Ok(out)
    }

    /// ASCII form, binding `ME` to `my_peer`. With `my_peer == ME`, a vector
    /// parsed from ASCII and not mutated since returns its source text.
    pub fn as_ascii(&self, my_peer: PeerId) -> String {
        if my_peer.is_me() && !self.changed {
            if let Some(source) = &self.source {
                return source.clone();
            }
        }
        let parts: Vec<String> = self.vers.iter().map(|v| v.ascii(my_peer)).collect();
        parts.join(",")
    }

    /// Canonical ASCII: `ME` bound to `my_peer`, versions sorted by author.
    /// Used as a digest input, never stored.
    pub fn canonical_ascii(&self, my_peer: PeerId) -> String {
        let mut expanded = self.clone();
        expanded.expand_me(my_peer);
        expanded.vers.sort_by_key(|v| v.author().to_string());
        expanded.mutated();
        expanded.as_ascii(PeerId::ME)
    }
}

/// Equality is causal: two vectors are equal when `compare_to` says `Same`.
impl PartialEq for VersionVector {
    fn eq(&self, other: &VersionVector) -> bool {
        self.compare_to(other) == VersionOrder::Same
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_ascii(PeerId::ME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(ascii: &str) -> VersionVector {
        VersionVector::from_ascii(ascii, PeerId::ME).unwrap()
    }

    #[test]
    fn test_parse_and_emit() {
        let v = vv("2@aa,1@bb");
        assert_eq!(v.count(), 2);
        assert_eq!(v.current().unwrap().gen(), 2);
        assert_eq!(v.gen_of_peer(PeerId(0xaa)), 2);
        assert_eq!(v.gen_of_peer(PeerId(0xbb)), 1);
        assert_eq!(v.gen_of_peer(PeerId(0xcc)), 0);
        assert_eq!(v.as_ascii(PeerId::ME), "2@aa,1@bb");
    }

    #[test]
    fn test_parse_rejects_duplicate_author() {
        assert!(VersionVector::from_ascii("2@aa,1@aa", PeerId::ME).is_err());
        assert!(VersionVector::from_ascii("", PeerId::ME).is_err());
    }

    #[test]
    fn test_binary_round_trip() {
        let v = vv("2@aa,1@bb");
        let bin = v.as_binary(PeerId::ME).unwrap();
        assert_eq!(bin[0], BINARY_TAG);
        let back = VersionVector::from_binary(&bin).unwrap();
        assert_eq!(back.compare_to(&v), VersionOrder::Same);
        assert_eq!(back.as_ascii(PeerId::ME), "2@aa,1@bb");

        let current = VersionVector::read_current_from_binary(&bin).unwrap();
        assert_eq!(current.gen(), 2);
        assert_eq!(current.author().peer(), Some(PeerId(0xaa)));
    }

    #[test]
    fn test_binary_requires_tag() {
        assert!(VersionVector::from_binary(&[1, 2]).is_err());
        assert!(VersionVector::from_binary(&[]).is_err());
    }

    // Scenario S4: vector ordering.
    #[test]
    fn test_compare_newer_older() {
        let a = vv("2@10,1@11");
        let b = vv("1@10,1@11");
        assert_eq!(a.compare_to(&b), VersionOrder::Newer);
        assert_eq!(b.compare_to(&a), VersionOrder::Older);
    }

    #[test]
    fn test_compare_conflicting() {
        let a = vv("2@10,1@11");
        let b = vv("1@10,2@11");
        assert_eq!(a.compare_to(&b), VersionOrder::Conflicting);
        assert_eq!(b.compare_to(&a), VersionOrder::Conflicting);
    }

    #[test]
    fn test_compare_same() {
        let a = vv("2@10,1@11");
        let b = vv("2@10,1@11");
        assert_eq!(a.compare_to(&b), VersionOrder::Same);
        assert_eq!(b.compare_to(&a), VersionOrder::Same);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compare_subset_is_older() {
        let a = vv("1@10");
        let b = vv("1@10,1@11");
        assert_eq!(a.compare_to(&b), VersionOrder::Older);
        assert_eq!(b.compare_to(&a), VersionOrder::Newer);
    }

    #[test]
    fn test_compare_to_version() {
        let v = vv("3@aa,2@bb");
        let head = Version::new(3, PeerId(0xaa)).unwrap();
        let tail = Version::new(2, PeerId(0xbb)).unwrap();
        let newer = Version::new(4, PeerId(0xaa)).unwrap();
        let absent = Version::new(1, PeerId(0xcc)).unwrap();
        assert_eq!(v.compare_to_version(&head), VersionOrder::Same);
        assert_eq!(v.compare_to_version(&tail), VersionOrder::Newer);
        assert_eq!(v.compare_to_version(&newer), VersionOrder::Older);
        assert_eq!(v.compare_to_version(&absent), VersionOrder::Older);
        // And the reverse view from the version's side:
        assert_eq!(newer.compare_to(&v), VersionOrder::Newer);
    }

    #[test]
    fn test_increment_monotonicity() {
        let old = vv("2@aa,1@bb");
        let mut v = old.clone();
        v.increment_gen(PeerId(0xbb)).unwrap();
        assert_eq!(v.compare_to(&old), VersionOrder::Newer);
        assert_eq!(v.gen_of_peer(PeerId(0xbb)), 2);
        assert_eq!(v.current().unwrap().author().peer(), Some(PeerId(0xbb)));
        assert_eq!(v.as_ascii(PeerId::ME), "2@bb,2@aa");
    }

    #[test]
    fn test_increment_new_peer_starts_at_one() {
        let mut v = VersionVector::new();
        v.increment_gen(PeerId::ME).unwrap();
        assert_eq!(v.as_ascii(PeerId::ME), "1@*");
        assert!(!v.is_empty());
    }

    #[test]
    fn test_increment_refused_on_merge_marker() {
        let mut v = vv("1@aa");
        v.insert_merge_rev_id(PeerId(0xff), b"{}").unwrap();
        let marker_author = v.current().unwrap().author().clone();
        let Author::Digest(_) = marker_author else {
            panic!("expected merge marker at head");
        };
        // Incrementing a real peer still works; the marker itself cannot be
        // incremented because digest authors are not peers.
        assert!(v.increment_gen(PeerId(0xaa)).is_ok());
    }

    // Scenario S5: merge.
    #[test]
    fn test_merge_takes_larger_generations() {
        let a = vv("2@10,1@11");
        let b = vv("1@10,3@11");
        let merged = a.merged_with(&b);
        assert_eq!(merged.gen_of_peer(PeerId(0x10)), 2);
        assert_eq!(merged.gen_of_peer(PeerId(0x11)), 3);

        let mut bumped = merged.clone();
        bumped.increment_gen(PeerId::ME).unwrap();
        assert_eq!(bumped.compare_to(&a), VersionOrder::Newer);
        assert_eq!(bumped.compare_to(&b), VersionOrder::Newer);
    }

    #[test]
    fn test_merge_idempotent_and_commutative() {
        let a = vv("2@10,1@11");
        let b = vv("1@10,3@11,1@12");
        assert_eq!(a.merged_with(&a).compare_to(&a), VersionOrder::Same);
        let ab = a.merged_with(&b);
        let ba = b.merged_with(&a);
        assert_eq!(ab.compare_to(&ba), VersionOrder::Same);
        assert!(matches!(
            ab.compare_to(&a),
            VersionOrder::Same | VersionOrder::Newer
        ));
    }

    #[test]
    fn test_add() {
        let mut v = vv("2@aa,3@bb");
        // Equal-or-newer by same author is refused:
        assert!(!v.add(Version::new(2, PeerId(0xaa)).unwrap()));
        assert!(!v.add(Version::new(1, PeerId(0xaa)).unwrap()));
        // Newer replaces and moves to front:
        assert!(v.add(Version::new(5, PeerId(0xaa)).unwrap()));
        assert_eq!(v.as_ascii(PeerId::ME), "5@aa,3@bb");
    }

    #[test]
    fn test_limit_count() {
        let mut v = vv("3@aa,2@bb,1@cc");
        v.limit_count(2);
        assert_eq!(v.as_ascii(PeerId::ME), "3@aa,2@bb");
        v.limit_count(5);
        assert_eq!(v.count(), 2);
    }

    #[test]
    fn test_expand_and_compact_me() {
        let me = PeerId(0xd00d);
        let mut v = vv("2@*,1@bb");
        v.expand_me(me);
        assert_eq!(v.as_ascii(PeerId::ME), "2@d00d,1@bb");
        v.compact_me(me);
        assert_eq!(v.as_ascii(PeerId::ME), "2@*,1@bb");
    }

    #[test]
    fn test_ascii_binding_of_me() {
        let v = vv("2@*,1@bb");
        assert_eq!(v.as_ascii(PeerId(0xabc)), "2@abc,1@bb");
    }

    #[test]
    fn test_canonical_ascii_sorts_by_author() {
        // "abc" sorts before "bb", after "11":
        let v = vv("2@*,1@bb");
        assert_eq!(v.canonical_ascii(PeerId(0xabc)), "2@abc,1@bb");
        let w = vv("2@*,1@11");
        assert_eq!(w.canonical_ascii(PeerId(0xabc)), "1@11,2@abc");
    }

    #[test]
    fn test_source_cache_invalidated_on_mutation() {
        let mut v = vv("2@aa,1@bb");
        assert_eq!(v.as_ascii(PeerId::ME), "2@aa,1@bb");
        v.increment_gen(PeerId(0xaa)).unwrap();
        assert_eq!(v.as_ascii(PeerId::ME), "3@aa,1@bb");
    }

    #[test]
    fn test_delta_round_trip() {
        let a = vv("1@10,3@11");
        let b = vv("2@12,4@11,1@10");
        let delta = b.delta_from(&a).unwrap();
        let rebuilt = a.by_applying_delta(&delta).unwrap();
        assert_eq!(rebuilt.compare_to(&b), VersionOrder::Same);
        assert_eq!(rebuilt.count(), b.count());
    }

    #[test]
    fn test_delta_refused_when_base_not_older() {
        let a = vv("2@10");
        let b = vv("1@10,1@11");
        assert!(b.delta_from(&a).is_none());
    }

    #[test]
    fn test_apply_delta_rejects_stale_entries() {
        let base = vv("3@10");
        let stale = vv("2@10");
        assert!(base.by_applying_delta(&stale).is_err());
    }

    #[test]
    fn test_read_history() {
        let v = VersionVector::read_history(&["3@aa", "2@bb", "1@cc"], PeerId::ME).unwrap();
        assert_eq!(v.as_ascii(PeerId::ME), "3@aa,2@bb,1@cc");
        // A lone entry may be a whole vector:
        let v = VersionVector::read_history(&["3@aa,2@bb"], PeerId::ME).unwrap();
        assert_eq!(v.count(), 2);
        // But trailing entries may not:
        assert!(VersionVector::read_history(&["3@aa", "2@bb,1@cc"], PeerId::ME).is_err());
        assert!(VersionVector::read_history(&[], PeerId::ME).is_err());
    }

    #[test]
    fn test_merge_marker_blocks_binary_emission() {
        let mut v = vv("1@aa");
        v.insert_merge_rev_id(PeerId(0xff), b"body").unwrap();
        assert!(v.as_binary(PeerId(0xff)).is_err());
    }
}
