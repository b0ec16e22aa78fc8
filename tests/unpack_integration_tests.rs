//! End-to-end unpack tests
//!
//! Path reconstruction, idempotent re-extraction, nested containers,
//! concurrency and cancellation against a real SQLite catalog.

mod common;

use common::{gzip_bytes, tar_bytes, zip_bytes, Harness};
use evidence_unpacker::archive::extraction_orchestrator::output_dir_for;
use evidence_unpacker::{JobId, UnpackStatus};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

fn names(items: &[evidence_unpacker::ContentItem]) -> Vec<String> {
    items.iter().map(|i| i.unique_path()).collect()
}

#[tokio::test]
async fn test_path_reconstruction() {
    let harness = Harness::new().await;
    let archive = zip_bytes(&[
        ("a/b/c.txt", b"see".as_slice()),
        ("a/b/d.txt", b"dee".as_slice()),
        ("a/e.txt", b"eee!".as_slice()),
    ]);
    let root = harness.add_root("bundle.zip", &archive).await;

    let outcome = harness
        .orchestrator()
        .unpack(JobId::new(), &root, None, &CancellationToken::new())
        .await;
    assert_eq!(outcome.status, UnpackStatus::Completed);
    assert!(!outcome.partial_failure);

    let items = harness.descendants(&root).await;
    assert_eq!(
        names(&items),
        vec![
            "/bundle.zip/a",
            "/bundle.zip/a/b",
            "/bundle.zip/a/b/c.txt",
            "/bundle.zip/a/b/d.txt",
            "/bundle.zip/a/e.txt",
        ]
    );

    let a = items.iter().find(|i| i.name == "a").unwrap();
    let b = items.iter().find(|i| i.name == "b").unwrap();
    let e = items.iter().find(|i| i.name == "e.txt").unwrap();
    assert_eq!(a.parent_id, Some(root.id));
    assert_eq!(b.parent_id, Some(a.id));
    assert_eq!(e.parent_id, Some(a.id));
    assert!(!a.is_file && !b.is_file);
    assert!(items.iter().all(|i| i.root_id == root.id));

    assert_eq!(e.size, 4);
    assert_eq!(harness.read_local(e), b"eee!");
    assert!(e.local_path.starts_with(output_dir_for(&root)));
}

#[tokio::test]
async fn test_reextraction_is_idempotent() {
    let harness = Harness::new().await;
    let archive = zip_bytes(&[
        ("docs/", b"".as_slice()),
        ("docs/report.txt", b"quarterly".as_slice()),
        ("notes.txt", b"n".as_slice()),
    ]);
    let root = harness.add_root("case.zip", &archive).await;
    let orchestrator = harness.orchestrator();
    let job = JobId::new();
    let cancel = CancellationToken::new();

    let first = orchestrator.unpack(job, &root, None, &cancel).await;
    assert_eq!(first.stats.added, 3);
    let cataloged = harness.catalog.count_items().await.unwrap();

    // output directory still present: nothing is reopened
    let second = orchestrator.unpack(job, &root, None, &cancel).await;
    assert_eq!(second.status, UnpackStatus::AlreadyProcessed);

    // output directory gone: re-extract but catalog nothing new
    std::fs::remove_dir_all(harness.output_root().join(output_dir_for(&root))).unwrap();
    let mut events = harness.bus.subscribe("idempotence");
    let third = orchestrator.unpack(job, &root, None, &cancel).await;
    assert_eq!(third.status, UnpackStatus::Completed);
    assert_eq!(third.stats.writes(), 0);
    assert_eq!(third.stats.skipped, 3);
    assert_eq!(harness.catalog.count_items().await.unwrap(), cataloged);
    assert!(events.try_recv().is_err(), "no ContentAdded for an unchanged archive");

    let report = harness
        .descendants(&root)
        .await
        .into_iter()
        .find(|i| i.name == "report.txt")
        .unwrap();
    assert_eq!(harness.read_local(&report), b"quarterly");
}

#[tokio::test]
async fn test_nested_tar_gz_is_unpacked_through_service() {
    let harness = Harness::new().await;
    let tarball = tar_bytes(&[
        ("var/log/syslog", b"boot ok".as_slice()),
        ("var/log/auth.log", b"login".as_slice()),
    ]);
    let outer = zip_bytes(&[
        ("logs.tar.gz", gzip_bytes(&tarball).as_slice()),
        ("readme.txt", b"see logs".as_slice()),
    ]);
    let root = harness.add_root("export.zip", &outer).await;
    let service = harness.service(2);

    let report = service.run(vec![root.clone()], None).await;
    assert_eq!(report.outcomes.len(), 3, "zip, gzip and tar are each unpacked");
    assert_eq!(report.count(UnpackStatus::Completed), 3);

    let items = harness.descendants(&root).await;
    let unique: Vec<String> = names(&items);
    assert!(unique.contains(&"/export.zip/logs.tar.gz/logs.tar".to_string()));
    assert!(unique.contains(&"/export.zip/logs.tar.gz/logs.tar/var/log/syslog".to_string()));

    let syslog = items.iter().find(|i| i.name == "syslog").unwrap();
    assert_eq!(harness.read_local(syslog), b"boot ok");
    assert_eq!(syslog.root_id, root.id);
    assert!(service.orchestrator().tracker().is_empty());
}

#[tokio::test]
async fn test_many_roots_with_bounded_concurrency() {
    let harness = Harness::new().await;
    let mut roots = Vec::new();
    for i in 0..8 {
        let inner = zip_bytes(&[("inner.txt", format!("inner {i}").as_bytes())]);
        let name = format!("part_{i}.txt");
        let outer = zip_bytes(&[(name.as_str(), b"top".as_slice()), ("inner.zip", inner.as_slice())]);
        roots.push(harness.add_root(&format!("root_{i}.zip"), &outer).await);
    }
    let service = harness.service(3);

    let report = service.run(roots, None).await;
    assert_eq!(report.outcomes.len(), 16);
    assert_eq!(report.count(UnpackStatus::Completed), 16);
    assert_eq!(report.total_added(), 8 * 3);
    assert_eq!(service.active_jobs(), 0);

    let stats = harness.bus.get_stats();
    assert_eq!(stats.events_by_type.get("ContentAdded"), Some(&16));
}

#[tokio::test]
async fn test_cancelled_unpack_leaves_catalog_untouched() {
    let harness = Harness::new().await;
    let archive = zip_bytes(&[("x.txt", b"x".as_slice())]);
    let root = harness.add_root("cancel.zip", &archive).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness
        .orchestrator()
        .unpack(JobId::new(), &root, None, &cancel)
        .await;
    assert_eq!(outcome.status, UnpackStatus::Cancelled);
    assert_eq!(harness.catalog.count_items().await.unwrap(), 1);
    assert!(!harness.output_root().join(output_dir_for(&root)).exists());
}

#[tokio::test]
async fn test_hostile_names_stay_inside_output_dir() {
    let harness = Harness::new().await;
    let archive = zip_bytes(&[
        ("../../escape.txt", b"nope".as_slice()),
        ("dir/./con:tent?.txt", b"odd".as_slice()),
    ]);
    let root = harness.add_root("hostile.zip", &archive).await;

    let outcome = harness
        .orchestrator()
        .unpack(JobId::new(), &root, None, &CancellationToken::new())
        .await;
    assert_eq!(outcome.status, UnpackStatus::Completed);

    let archive_dir = harness.output_root().join(output_dir_for(&root));
    for item in harness.descendants(&root).await {
        let local = item.resolve_local_path(&harness.output_root());
        assert!(local.starts_with(&archive_dir), "{} escaped", local.display());
    }

    let written: Vec<_> = WalkDir::new(harness.dir.path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.starts_with(harness.output_root()))
        .collect();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|p| p.starts_with(&archive_dir)));
    assert!(!harness.dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_codec_failure_on_unallocated_item_is_silent() {
    let harness = Harness::new().await;
    let root = harness
        .add_root_with("carved.zip", b"PK\x03\x04 truncated garbage", false)
        .await;
    let mut events = harness.bus.subscribe("silent");

    let outcome = harness
        .orchestrator()
        .unpack(JobId::new(), &root, None, &CancellationToken::new())
        .await;
    assert_eq!(outcome.status, UnpackStatus::Failed);
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}
