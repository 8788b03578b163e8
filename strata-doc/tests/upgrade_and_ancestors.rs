mod common;

use common::TestStore;
use strata_doc::ancestors::{find_doc_ancestors, ANCESTOR_EXISTS, ANCESTOR_EXISTS_NOT_CURRENT};
use strata_doc::put::{PutBody, PutRequest};
use strata_doc::tree_doc::TreeDocument;
use strata_doc::upgrade::{upgrade_document_versioning, Versioning};
use strata_doc::{DocError, VectorDocument};
use strata_model::{Error, RemoteId};
use strata_store::{ContentLevel, StoreConfig};

fn existing<'a>(history: &'a [&'a str], body: &'a [u8], remote: RemoteId) -> PutRequest<'a> {
    PutRequest {
        body: PutBody::Bytes(Some(body)),
        history,
        remote,
        ..PutRequest::new(b"")
    }
}

/// Build the upgrade fixture: a three-revision local branch, with the
/// default remote pinned to a two-revision side branch, so the common
/// ancestor is the generation-1 root.
fn seed_tree_doc(ts: &TestStore) {
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    doc.put_existing(&["1-aa"], b"{\"v\":1}", false, false, false, RemoteId::LOCAL)
        .unwrap();
    doc.put_existing(
        &["3-cc", "2-bb", "1-aa"],
        b"{\"v\":3}",
        false,
        false,
        false,
        RemoteId::LOCAL,
    )
    .unwrap();
    doc.put_existing(
        &["2-dd", "1-aa"],
        b"{\"remote\":true}",
        false,
        false,
        true,
        RemoteId::DEFAULT,
    )
    .unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(20, &mut txn).unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_upgrade_synthesizes_legacy_vector() {
    let ts = TestStore::new();
    seed_tree_doc(&ts);

    let mut txn = ts.store.begin_transaction().unwrap();
    let count =
        upgrade_document_versioning(&ts.store, Versioning::TreeV3, Versioning::Vectors, &mut txn)
            .unwrap();
    txn.commit().unwrap();
    assert_eq!(count, 1);

    // current gen 3, common ancestor gen 1: two local changes on top of the
    // legacy base.
    let doc = VectorDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert!(doc.exists());
    assert_eq!(doc.rev_id_ascii().unwrap().unwrap(), "2@*,1@7777777");
    // The remote slot carries the pinned revision's generation as a
    // one-element legacy vector:
    assert_eq!(
        doc.remote_ancestor_rev_id(RemoteId::DEFAULT).unwrap().unwrap(),
        "2@7777777"
    );
    assert_eq!(doc.selected_body().unwrap(), b"{\"v\":3}");
}

#[test]
fn test_upgrade_without_remotes_keeps_body() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc2", ContentLevel::Entire).unwrap();
    doc.put_existing(
        &["3-cc", "2-bb", "1-aa"],
        b"{\"v\":3}",
        false,
        false,
        false,
        RemoteId::LOCAL,
    )
    .unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(20, &mut txn).unwrap();
    txn.commit().unwrap();

    let mut txn = ts.store.begin_transaction().unwrap();
    upgrade_document_versioning(&ts.store, Versioning::TreeV3, Versioning::Vectors, &mut txn)
        .unwrap();
    txn.commit().unwrap();

    // No remote base: the whole history is ours.
    let doc = VectorDocument::open(&ts.store, "doc2", ContentLevel::Entire).unwrap();
    assert_eq!(doc.rev_id_ascii().unwrap().unwrap(), "3@*");
    assert_eq!(doc.selected_body().unwrap(), b"{\"v\":3}");
}

#[test]
fn test_upgrade_preserves_sequences() {
    let ts = TestStore::new();
    seed_tree_doc(&ts);
    let seq_before = ts.store.get("doc1", ContentLevel::MetaOnly).unwrap().sequence;

    let mut txn = ts.store.begin_transaction().unwrap();
    upgrade_document_versioning(&ts.store, Versioning::TreeV3, Versioning::Vectors, &mut txn)
        .unwrap();
    txn.commit().unwrap();

    let rec = ts.store.get("doc1", ContentLevel::MetaOnly).unwrap();
    assert_eq!(rec.sequence, seq_before);
}

#[test]
fn test_upgrade_refusals() {
    let ts = TestStore::new();
    let mut txn = ts.store.begin_transaction().unwrap();

    // Same scheme: nothing to do.
    assert_eq!(
        upgrade_document_versioning(&ts.store, Versioning::Vectors, Versioning::Vectors, &mut txn)
            .unwrap(),
        0
    );
    // Downgrades are not a thing:
    assert!(matches!(
        upgrade_document_versioning(&ts.store, Versioning::Vectors, Versioning::TreeV3, &mut txn),
        Err(DocError::Model(Error::Unimplemented(_)))
    ));
    txn.abort().unwrap();

    // A store flagged no-upgrade refuses:
    let ts = TestStore::with_config(StoreConfig { read_only: false, no_upgrade: true });
    let mut txn = ts.store.begin_transaction().unwrap();
    assert!(matches!(
        upgrade_document_versioning(&ts.store, Versioning::TreeV3, Versioning::Vectors, &mut txn),
        Err(DocError::Model(Error::CantUpgradeDatabase))
    ));
    txn.abort().unwrap();
}

#[test]
fn test_tree_to_tree_resave() {
    let ts = TestStore::new();
    seed_tree_doc(&ts);
    let seq_before = ts.store.get("doc1", ContentLevel::MetaOnly).unwrap().sequence;

    let mut txn = ts.store.begin_transaction().unwrap();
    let count =
        upgrade_document_versioning(&ts.store, Versioning::TreeV2, Versioning::TreeV3, &mut txn)
            .unwrap();
    txn.commit().unwrap();
    assert_eq!(count, 1);

    // Still a rev tree, same sequence, same current revision:
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert_eq!(doc.sequence(), seq_before);
    assert_eq!(doc.current_rev_id().unwrap().ascii(), "3-cc");
}

// ---- Ancestor finding:

fn seed_vector_docs(ts: &TestStore) {
    let mut txn = ts.store.begin_transaction().unwrap();

    // "known": we hold 2@aa plus a lagging pin for remote #1.
    let mut doc = VectorDocument::open(&ts.store, "known", ContentLevel::Entire).unwrap();
    doc.put_existing(&existing(&["2@aa"], b"{}", RemoteId(1)), Some(&mut txn))
        .unwrap();
    doc.put_existing(&existing(&["1@aa"], b"{}", RemoteId(1)), Some(&mut txn))
        .unwrap();

    // "behind": we hold only 1@bb.
    let mut doc = VectorDocument::open(&ts.store, "behind", ContentLevel::Entire).unwrap();
    doc.put_existing(&existing(&["1@bb"], b"{}", RemoteId::LOCAL), Some(&mut txn))
        .unwrap();

    txn.commit().unwrap();
}

#[test]
fn test_ancestor_exists() {
    let ts = TestStore::new();
    seed_vector_docs(&ts);

    let out = find_doc_ancestors(&ts.store, &[("known", "1@aa")], 5, false, RemoteId::LOCAL)
        .unwrap();
    assert_eq!(out, [ANCESTOR_EXISTS]);

    // With remote #1 in play, its pinned revision (1@aa) no longer matches
    // the target, so the answer is "exists, but the remote is out of date":
    let out = find_doc_ancestors(&ts.store, &[("known", "2@aa")], 5, false, RemoteId(1)).unwrap();
    assert_eq!(out, [ANCESTOR_EXISTS_NOT_CURRENT]);
}

#[test]
fn test_ancestor_candidates() {
    let ts = TestStore::new();
    seed_vector_docs(&ts);

    // The target is ahead of everything we hold; our stored vectors are
    // offered as candidate ancestors, deduplicated.
    let out = find_doc_ancestors(&ts.store, &[("behind", "3@bb")], 5, false, RemoteId::LOCAL)
        .unwrap();
    assert_eq!(out, ["[\"1@bb\"]"]);

    // Unknown documents yield an empty candidate list:
    let out = find_doc_ancestors(&ts.store, &[("missing", "1@cc")], 5, false, RemoteId::LOCAL)
        .unwrap();
    assert_eq!(out, ["[]"]);

    // max_ancestors caps the list:
    let out = find_doc_ancestors(&ts.store, &[("known", "9@aa")], 1, false, RemoteId::LOCAL)
        .unwrap();
    let parsed: Vec<String> = serde_json::from_str(&out[0]).unwrap();
    assert_eq!(parsed.len(), 1);
}

#[test]
fn test_ancestor_batch_order() {
    let ts = TestStore::new();
    seed_vector_docs(&ts);
    let out = find_doc_ancestors(
        &ts.store,
        &[("behind", "3@bb"), ("known", "1@aa")],
        5,
        false,
        RemoteId::LOCAL,
    )
    .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], "[\"1@bb\"]");
    assert_eq!(out[1], ANCESTOR_EXISTS);
}
