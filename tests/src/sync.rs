use std::time::Duration;

use dmirror_sync::{
    oracle,
    storage::{id::Id, DeleteOutcome},
    Existence, SyncEngine, SyncOptions,
};
use tokio_util::sync::CancellationToken;

use crate::{init_log, stubs::store::Stub, utils::LocalTree};

fn engine(stub: &Stub) -> SyncEngine<Stub> {
    SyncEngine::new(stub.clone(), SyncOptions::default())
}

#[tokio::test]
async fn mirror_tree_then_rerun() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "rock/b.mp3", "jazz/c.mp3", "d.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert!(report.is_clean());
    assert_eq!(report.folders_created, 2);
    assert_eq!(report.files_uploaded, 4);

    let rock = stub.live(&songs, "rock");
    assert_eq!(rock.len(), 1);
    assert!(rock[0].folder);
    let a = stub.live(&rock[0].id, "a.mp3");
    assert_eq!(a.len(), 1);
    assert!(!a[0].folder);
    assert_eq!(a[0].content, b"rock/a.mp3");
    assert_eq!(stub.live(&songs, "d.mp3").len(), 1);

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert!(report.is_clean());
    assert_eq!(report.folders_created, 0);
    assert_eq!(report.folders_reused, 2);
    assert_eq!(report.files_uploaded, 0);
    assert_eq!(report.files_skipped, 4);

    assert_eq!(stub.folders_created(), 2);
    assert_eq!(stub.files_uploaded(), 4);
    Ok(())
}

#[tokio::test]
async fn existing_folder_is_reused() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let rock = stub.add_folder("rock", Some(&songs));

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert_eq!(report.folders_reused, 1);
    assert_eq!(report.folders_created, 0);
    assert_eq!(stub.live(&songs, "rock").len(), 1);
    assert_eq!(stub.live(&rock, "a.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn existing_file_is_skipped() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["a.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    stub.add_file("a.mp3", Some(&songs), b"old");

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_uploaded, 0);

    let a = stub.live(&songs, "a.mp3");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].content, b"old");
    Ok(())
}

#[tokio::test]
async fn overwrite_uploads_duplicate() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let rock = stub.add_folder("rock", Some(&songs));
    stub.add_file("a.mp3", Some(&rock), b"old");

    let options = SyncOptions {
        overwrite: true,
        ..Default::default()
    };
    let report = SyncEngine::new(stub.clone(), options)
        .sync(tree.root(), &songs)
        .await?;
    assert_eq!(report.files_uploaded, 1);
    // folders are still reused
    assert_eq!(report.folders_reused, 1);
    assert_eq!(stub.live(&songs, "rock").len(), 1);

    let a = stub.live(&rock, "a.mp3");
    assert_eq!(a.len(), 2);
    assert!(a.iter().any(|f| f.content == b"rock/a.mp3"));
    Ok(())
}

#[tokio::test]
async fn trashed_objects_do_not_count() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "b.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let old_rock = stub.add_folder("rock", Some(&songs));
    stub.trash(&old_rock);
    let old_b = stub.add_file("b.mp3", Some(&songs), b"old");
    stub.trash(&old_b);

    assert_eq!(
        oracle::resolve(&stub, "rock", &songs).await?,
        Existence::TrashedOnly
    );

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert_eq!(report.folders_created, 1);
    assert_eq!(report.files_uploaded, 2);

    let rock = stub.live(&songs, "rock");
    assert_eq!(rock.len(), 1);
    assert_ne!(rock[0].id, old_rock);
    assert_eq!(stub.live(&rock[0].id, "a.mp3").len(), 1);
    assert!(stub.children(&old_rock).is_empty());

    let rocks: Vec<_> = stub
        .children(&songs)
        .into_iter()
        .filter(|o| o.name == "rock")
        .collect();
    assert_eq!(rocks.len(), 2);
    assert_eq!(stub.live(&songs, "b.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn resolve_existence() -> anyhow::Result<()> {
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let rock = stub.add_folder("rock", Some(&songs));
    // same name elsewhere doesn't count
    stub.add_folder("jazz", None);

    assert_eq!(
        oracle::resolve(&stub, "jazz", &songs).await?,
        Existence::Absent
    );
    let existence = oracle::resolve(&stub, "rock", &songs).await?;
    assert_eq!(existence.live().map(|o| &o.id), Some(&rock));

    // a live duplicate wins over a trashed one
    stub.trash(&rock);
    let rock2 = stub.add_folder("rock", Some(&songs));
    let existence = oracle::resolve(&stub, "rock", &songs).await?;
    assert_eq!(existence.live().map(|o| &o.id), Some(&rock2));
    Ok(())
}

#[tokio::test]
async fn names_with_quotes() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["O'Brien/it's.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);

    engine(&stub).sync(tree.root(), &songs).await?;
    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert_eq!(report.folders_reused, 1);
    assert_eq!(report.files_skipped, 1);

    let folder = stub.live(&songs, "O'Brien");
    assert_eq!(folder.len(), 1);
    assert_eq!(stub.live(&folder[0].id, "it's.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn upload_failure_is_confined() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["a.mp3", "b.mp3", "rock/c.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    stub.fail_upload("b.mp3");

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert!(!report.is_clean());
    assert!(!report.cancelled);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].path.file_name(), Some("b.mp3"));
    assert_eq!(report.files_uploaded, 2);

    assert_eq!(stub.live(&songs, "a.mp3").len(), 1);
    assert!(stub.live(&songs, "b.mp3").is_empty());
    let rock = stub.live(&songs, "rock");
    assert_eq!(stub.live(&rock[0].id, "c.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn unlistable_directory_is_confined() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "jazz/b.mp3", "c.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let rock_dir = tree.root().join("rock");
    stub.remove_on_create("rock", &rock_dir);

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert!(!report.is_clean());
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].path, rock_dir);
    assert!(matches!(report.failures[0].error, dmirror::Error::Io(_)));
    assert_eq!(report.folders_created, 2);
    assert_eq!(report.files_uploaded, 2);

    let rock = stub.live(&songs, "rock");
    assert_eq!(rock.len(), 1);
    assert!(stub.children(&rock[0].id).is_empty());
    let jazz = stub.live(&songs, "jazz");
    assert_eq!(stub.live(&jazz[0].id, "b.mp3").len(), 1);
    assert_eq!(stub.live(&songs, "c.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn folder_creation_failure_is_confined() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "jazz/b.mp3", "c.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    stub.fail_create("rock");

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].path, tree.root().join("rock"));
    assert!(matches!(report.failures[0].error, dmirror::Error::Api(_)));
    assert_eq!(report.folders_created, 1);
    assert_eq!(report.files_uploaded, 2);

    assert!(stub.live(&songs, "rock").is_empty());
    assert!(stub.objects().iter().all(|o| o.name != "a.mp3"));
    let jazz = stub.live(&songs, "jazz");
    assert_eq!(stub.live(&jazz[0].id, "b.mp3").len(), 1);
    assert_eq!(stub.live(&songs, "c.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn same_name_under_distinct_parents() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["a/x/f.mp3", "b/x/f.mp3"]).await?;
    let stub = Stub::new().with_latency(Duration::from_millis(5));
    let songs = stub.add_folder("Songs", None);

    let report = engine(&stub).sync(tree.root(), &songs).await?;
    assert!(report.is_clean());
    assert_eq!(report.folders_created, 4);
    assert_eq!(report.files_uploaded, 2);

    let a = stub.live(&songs, "a");
    let b = stub.live(&songs, "b");
    let ax = stub.live(&a[0].id, "x");
    let bx = stub.live(&b[0].id, "x");
    assert_eq!(ax.len(), 1);
    assert_eq!(bx.len(), 1);
    assert_ne!(ax[0].id, bx[0].id);

    let af = stub.live(&ax[0].id, "f.mp3");
    let bf = stub.live(&bx[0].id, "f.mp3");
    assert_eq!(af.len(), 1);
    assert_eq!(bf.len(), 1);
    assert_eq!(af[0].content, b"a/x/f.mp3");
    assert_eq!(bf[0].content, b"b/x/f.mp3");
    Ok(())
}

#[tokio::test]
async fn missing_local_root_fails() -> anyhow::Result<()> {
    init_log();
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let root = crate::utils::temp_path(Some("dmirror-missing"), None);

    let res = engine(&stub).sync(&root, &songs).await;
    assert!(matches!(res, Err(dmirror::Error::Io(_))));
    assert_eq!(stub.objects().len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_pass_does_nothing() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "b.mp3"]).await?;
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine(&stub)
        .with_cancel(cancel)
        .sync(tree.root(), &songs)
        .await?;
    assert!(report.cancelled);
    assert!(!report.is_clean());
    assert_eq!(report.folders_created + report.files_uploaded, 0);
    assert_eq!(stub.objects().len(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_passes_create_once() -> anyhow::Result<()> {
    init_log();
    let tree = LocalTree::new(&["rock/a.mp3", "rock/b.mp3", "c.mp3"]).await?;
    let stub = Stub::new().with_latency(Duration::from_millis(5));
    let songs = stub.add_folder("Songs", None);
    let engine = engine(&stub);

    let (first, second) = tokio::join!(
        engine.sync(tree.root(), &songs),
        engine.sync(tree.root(), &songs)
    );
    let (first, second) = (first?, second?);
    assert!(first.is_clean() && second.is_clean());

    assert_eq!(stub.folders_created(), 1);
    assert_eq!(stub.files_uploaded(), 3);
    let rock = stub.live(&songs, "rock");
    assert_eq!(rock.len(), 1);
    assert_eq!(stub.live(&rock[0].id, "a.mp3").len(), 1);
    assert_eq!(stub.live(&rock[0].id, "b.mp3").len(), 1);
    assert_eq!(stub.live(&songs, "c.mp3").len(), 1);
    Ok(())
}

#[tokio::test]
async fn remote_calls_are_bounded() -> anyhow::Result<()> {
    init_log();
    let files: Vec<String> = (0..12).map(|i| format!("track{i}.mp3")).collect();
    let files: Vec<&str> = files.iter().map(String::as_str).collect();
    let tree = LocalTree::new(&files).await?;
    let stub = Stub::new().with_latency(Duration::from_millis(5));
    let songs = stub.add_folder("Songs", None);

    let options = SyncOptions {
        concurrency: 3,
        ..Default::default()
    };
    let report = SyncEngine::new(stub.clone(), options)
        .sync(tree.root(), &songs)
        .await?;
    assert_eq!(report.files_uploaded, 12);
    assert!(stub.max_in_flight() <= 3);
    Ok(())
}

#[tokio::test]
async fn remove_outcomes() -> anyhow::Result<()> {
    init_log();
    let stub = Stub::new();
    let songs = stub.add_folder("Songs", None);
    let a = stub.add_file("a.mp3", Some(&songs), b"a");
    let engine = engine(&stub);

    assert!(engine.remove(&a).await.is_deleted());
    assert!(stub.live(&songs, "a.mp3").is_empty());
    assert!(matches!(
        engine.remove(Id::new("nowhere")).await,
        DeleteOutcome::NotFound
    ));
    Ok(())
}
