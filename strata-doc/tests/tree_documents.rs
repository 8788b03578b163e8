mod common;

use common::TestStore;
use strata_doc::put::SaveResult;
use strata_doc::tree_doc::{generate_rev_id, TreeDocument};
use strata_doc::DocError;
use strata_model::{Error, RemoteId, RevId};
use strata_store::{ContentLevel, DocumentFlags};

const DEPTH: u32 = 20;

#[test]
fn test_put_new_and_save() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert!(!doc.exists());

    let put = doc.put_new(b"{\"n\":1}", None, false, false, false).unwrap();
    assert_eq!(put.status, 201);
    assert_eq!(put.rev_id.generation(), 1);

    let mut txn = ts.store.begin_transaction().unwrap();
    assert_eq!(doc.save(DEPTH, &mut txn).unwrap(), SaveResult::NewSequence);
    txn.commit().unwrap();
    assert_eq!(doc.sequence(), 1);

    // Reload and check everything round-tripped:
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert!(doc.exists());
    assert_eq!(doc.current_rev_id().unwrap(), put.rev_id);
    assert!(doc.select_current_revision());
    assert_eq!(doc.load_selected_body().unwrap().as_ref(), b"{\"n\":1}");
}

#[test]
fn test_put_chain_and_reput() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let first = doc.put_new(b"{}", None, false, false, false).unwrap();
    let second = doc
        .put_new(b"{\"x\":1}", Some(&first.rev_id), false, false, false)
        .unwrap();
    assert_eq!(second.status, 201);
    assert_eq!(second.rev_id.generation(), 2);

    // Re-putting the identical revision is idempotent:
    let again = doc
        .put_new(b"{\"x\":1}", Some(&first.rev_id), false, false, false)
        .unwrap();
    assert_eq!(again.status, 200);
    assert_eq!(again.rev_id, second.rev_id);

    // A different edit against the stale parent is a conflict:
    let err = doc
        .put_new(b"{\"x\":2}", Some(&first.rev_id), false, false, false)
        .unwrap_err();
    assert_eq!(err.http_status(), 409);

    // ...unless conflicts are allowed:
    let branch = doc
        .put_new(b"{\"x\":2}", Some(&first.rev_id), false, false, true)
        .unwrap();
    assert_eq!(branch.status, 201);
    assert!(doc.tree().has_conflict());
}

#[test]
fn test_deletion_status_and_flags() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let first = doc.put_new(b"{}", None, false, false, false).unwrap();
    let tombstone = doc.put_new(b"", Some(&first.rev_id), true, false, false).unwrap();
    assert_eq!(tombstone.status, 200); // deletions answer 200, not 201

    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(DEPTH, &mut txn).unwrap();
    txn.commit().unwrap();
    assert!(doc.flags().contains(DocumentFlags::DELETED));
}

#[test]
fn test_put_existing_with_history() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();

    let ancestor = doc
        .put_existing(&["1-aa"], b"{}", false, false, false, RemoteId::LOCAL)
        .unwrap();
    assert_eq!(ancestor, 1);

    let ancestor = doc
        .put_existing(
            &["3-cc", "2-bb", "1-aa"],
            b"{\"v\":3}",
            false,
            false,
            false,
            RemoteId::DEFAULT,
        )
        .unwrap();
    assert_eq!(ancestor, 2);
    // The remote pointer followed the incoming revision:
    assert_eq!(
        doc.latest_revision_on_remote(RemoteId::DEFAULT).unwrap(),
        &RevId::parse_ascii("3-cc").unwrap()
    );
    // The middle of the history is a body-less placeholder:
    assert!(doc.select_revision(&RevId::parse_ascii("2-bb").unwrap()));
    assert!(matches!(
        doc.load_selected_body(),
        Err(DocError::Model(Error::Gone))
    ));

    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(DEPTH, &mut txn).unwrap();
    txn.commit().unwrap();

    // Everything survives a reload:
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert_eq!(
        doc.current_rev_id().unwrap(),
        RevId::parse_ascii("3-cc").unwrap()
    );
    assert_eq!(
        doc.latest_revision_on_remote(RemoteId::DEFAULT).unwrap(),
        &RevId::parse_ascii("3-cc").unwrap()
    );
}

#[test]
fn test_selection_walk() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    doc.put_existing(&["1-aa"], b"{}", false, false, false, RemoteId::LOCAL)
        .unwrap();
    doc.put_existing(&["2-bb", "1-aa"], b"{}", false, false, false, RemoteId::LOCAL)
        .unwrap();
    doc.put_existing(&["2-cc", "1-aa"], b"{}", true, false, true, RemoteId::LOCAL)
        .unwrap();

    assert!(doc.select_current_revision());
    assert_eq!(doc.selected_rev_id().unwrap().ascii(), "2-bb");
    assert!(doc.select_parent());
    assert_eq!(doc.selected_rev_id().unwrap().ascii(), "1-aa");
    assert!(!doc.select_parent());

    // Walk leaves: 2-bb, then (with deletions included) the tombstone 2-cc.
    doc.select_current_revision();
    assert!(!doc.select_next_leaf(false));
    doc.select_current_revision();
    assert!(doc.select_next_leaf(true));
    assert_eq!(doc.selected_rev_id().unwrap().ascii(), "2-cc");
}

#[test]
fn test_purge_revision_and_record_removal() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let first = doc.put_new(b"{}", None, false, false, false).unwrap();
    let second = doc.put_new(b"{}", Some(&first.rev_id), false, false, false).unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(DEPTH, &mut txn).unwrap();
    txn.commit().unwrap();

    // Purging the only branch empties the tree; saving drops the record.
    assert_eq!(doc.purge_revision(&second.rev_id), 2);
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(DEPTH, &mut txn).unwrap();
    txn.commit().unwrap();
    assert!(!doc.exists());
    assert!(!ts.store.get("doc1", ContentLevel::Entire).unwrap().exists);
}

#[test]
fn test_save_prunes_deep_history() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let mut parent: Option<RevId> = None;
    for i in 0..10 {
        let body = format!("{{\"i\":{i}}}");
        let put = doc
            .put_new(body.as_bytes(), parent.as_ref(), false, false, false)
            .unwrap();
        parent = Some(put.rev_id);
    }
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(3, &mut txn).unwrap();
    txn.commit().unwrap();

    let doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    assert_eq!(doc.tree().len(), 3);
}

#[test]
fn test_stale_save_is_a_conflict() {
    let ts = TestStore::new();
    let mut first = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let mut second = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();

    first.put_new(b"{}", None, false, false, false).unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    assert_eq!(first.save(DEPTH, &mut txn).unwrap(), SaveResult::NewSequence);
    txn.commit().unwrap();

    // The second handle still thinks the doc is new; its save must lose.
    second.put_new(b"{\"other\":true}", None, false, false, false).unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    assert_eq!(second.save(DEPTH, &mut txn).unwrap(), SaveResult::Conflict);
    txn.abort().unwrap();
}

#[test]
fn test_gone_after_body_compaction() {
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let first = doc.put_new(b"{}", None, false, false, false).unwrap();
    doc.put_new(b"{\"x\":1}", Some(&first.rev_id), false, false, false).unwrap();
    let mut txn = ts.store.begin_transaction().unwrap();
    doc.save(DEPTH, &mut txn).unwrap();
    txn.commit().unwrap();

    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    doc.tree_mut().remove_non_leaf_bodies();
    assert!(doc.select_revision(&first.rev_id));
    let err = doc.load_selected_body().unwrap_err();
    assert_eq!(err.http_status(), 410);
}

#[test]
fn test_generated_ids_diverge_per_branch_content() {
    // Same parent, different bodies: different IDs (and a real conflict).
    let ts = TestStore::new();
    let mut doc = TreeDocument::open(&ts.store, "doc1", ContentLevel::Entire).unwrap();
    let root = doc.put_new(b"{}", None, false, false, false).unwrap();
    let a = generate_rev_id(b"{\"a\":1}", Some(&root.rev_id), false).unwrap();
    let b = generate_rev_id(b"{\"b\":2}", Some(&root.rev_id), false).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.generation(), 2);
    assert_eq!(b.generation(), 2);
}
