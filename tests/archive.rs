#![cfg(feature = "memory-store")]

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use rs_mediastore::{
    AccountId, Actor, AlbumId, ArchiveJobId, ArchiveJobService, ArchiveJobStore, ArtifactKind,
    ArtifactStore, CapabilityResolver, CompressionQueue, Config, Error, JobState,
    LifecycleCoordinator, LocalArtifactStore, MediaItem, MediaService, MemoryStore,
    TaskRegistry, build_archive,
};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use zip::ZipArchive;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR-one";
const PNG_TWO: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR-two";

struct Env {
    _temp: TempDir,
    store: Arc<MemoryStore>,
    artifacts: Arc<LocalArtifactStore>,
    media: MediaService<MemoryStore>,
    archives: ArchiveJobService<MemoryStore>,
    registry: Arc<TaskRegistry>,
    owner: Actor,
    album: AlbumId,
}

async fn env(config: Config) -> Env {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let artifacts = Arc::new(LocalArtifactStore::new(temp.path()).await.unwrap());
    let resolver = CapabilityResolver::new(Arc::clone(&store));
    let registry = Arc::new(TaskRegistry::new());
    let (queue, _receiver) = CompressionQueue::new(&config);
    let lifecycle = LifecycleCoordinator::new(resolver.clone(), artifacts.clone());
    let owner = Actor::account(AccountId::try_from("owner").unwrap());
    let album = lifecycle.create_album(&owner, "Trip", "").await.unwrap().id;
    Env {
        _temp: temp,
        media: MediaService::new(resolver.clone(), artifacts.clone(), queue),
        archives: ArchiveJobService::new(resolver, artifacts.clone(), Arc::clone(&registry), &config),
        store,
        artifacts,
        registry,
        owner,
        album,
    }
}

async fn archive_bytes(env: &Env, job: &ArchiveJobId) -> Vec<u8> {
    let mut file = env.archives.get_data(&env.owner, job).await.unwrap();
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await.unwrap();
    bytes
}

async fn wait_until_settled(env: &Env, job: &ArchiveJobId) -> JobState {
    for _ in 0..200 {
        let state = env.store.get_job(job).await.unwrap().unwrap().state;
        if state != JobState::Pending {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    JobState::Pending
}

#[tokio::test(flavor = "current_thread")]
async fn data_is_not_ready_until_built_then_matches_snapshot() {
    let env = env(Config::default()).await;
    let first = env
        .media
        .upload(&env.owner, "one.png", PNG, Some(&env.album))
        .await
        .unwrap();
    let second = env
        .media
        .upload(&env.owner, "one.png", PNG_TWO, Some(&env.album))
        .await
        .unwrap();

    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    // Nothing yields between init and read, so the build has not run yet.
    let err = env.archives.get_data(&env.owner, &job).await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));

    assert_eq!(wait_until_settled(&env, &job).await, JobState::Ready);
    let bytes = archive_bytes(&env, &job).await;

    let snapshot: Vec<MediaItem> = vec![first, second];
    let direct = build_archive(&*env.artifacts, &snapshot).unwrap();
    assert_eq!(bytes, direct.bytes);
    assert_eq!(direct.summary.entries, 2);

    let row = env.store.get_job(&job).await.unwrap().unwrap();
    let on_disk = env.artifacts.locate(ArtifactKind::Archive, &row.artifact_name);
    assert_eq!(std::fs::read(on_disk).unwrap(), direct.bytes);

    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.len(), 2);
    let mut content = Vec::new();
    zip.by_name("one_1.png")
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    assert_eq!(content, PNG_TWO);
}

#[tokio::test]
async fn later_album_edits_do_not_change_a_snapshot() {
    let env = env(Config::default()).await;
    env.media
        .upload(&env.owner, "kept.png", PNG, Some(&env.album))
        .await
        .unwrap();
    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    env.media
        .upload(&env.owner, "late.png", PNG_TWO, Some(&env.album))
        .await
        .unwrap();

    assert_eq!(wait_until_settled(&env, &job).await, JobState::Ready);
    let bytes = archive_bytes(&env, &job).await;
    let zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.len(), 1);
}

#[tokio::test]
async fn unreadable_originals_are_skipped() {
    let env = env(Config::default()).await;
    let broken = env
        .media
        .upload(&env.owner, "gone.png", PNG, Some(&env.album))
        .await
        .unwrap();
    env.media
        .upload(&env.owner, "fine.png", PNG_TWO, Some(&env.album))
        .await
        .unwrap();
    env.artifacts
        .remove(ArtifactKind::Original, &broken.storage_name)
        .await
        .unwrap();

    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    assert_eq!(wait_until_settled(&env, &job).await, JobState::Ready);
    let bytes = archive_bytes(&env, &job).await;
    let zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.file_names().collect::<Vec<_>>(), vec!["fine.png"]);
}

#[tokio::test]
async fn only_the_initiator_consumes() {
    let env = env(Config::default()).await;
    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    wait_until_settled(&env, &job).await;

    let stranger = Actor::account(AccountId::try_from("stranger").unwrap());
    let err = env.archives.get_data(&stranger, &job).await.unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));
    let err = env.archives.get_job(&stranger, &job).await.unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));
    assert_eq!(
        env.archives.get_job(&env.owner, &job).await.unwrap().title,
        "Trip"
    );
}

#[tokio::test]
async fn viewer_required_to_start() {
    let env = env(Config::default()).await;
    let stranger = Actor::account(AccountId::try_from("stranger").unwrap());
    let err = env
        .archives
        .init_job(&stranger, &env.album)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));
    let err = env
        .archives
        .init_job(&env.owner, &AlbumId::generate())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn shutdown_fails_pending_jobs() {
    // One permit: the second build queues behind the first.
    let env = env(Config::default().with_archive_concurrency(1)).await;
    env.media
        .upload(&env.owner, "one.png", PNG, Some(&env.album))
        .await
        .unwrap();
    let blocker = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();

    let failed = env.archives.shutdown().await.unwrap();
    let settled = wait_until_settled(&env, &blocker).await;
    assert_ne!(settled, JobState::Pending);
    let row = env.store.get_job(&job).await.unwrap().unwrap();
    if failed.contains(&job) {
        assert_eq!(row.state, JobState::Failed);
        let err = env.archives.get_data(&env.owner, &job).await.unwrap_err();
        assert!(matches!(err, Error::ArchiveFailed { .. }));
    } else {
        assert_eq!(row.state, JobState::Ready);
    }
    assert!(env.registry.running_jobs().is_empty());
}

#[tokio::test]
async fn orphaned_pending_jobs_are_recovered() {
    let env = env(Config::default()).await;
    let job = env.archives.init_job(&env.owner, &env.album).await.unwrap();
    wait_until_settled(&env, &job).await;

    // A row left Pending by a previous process has no live task.
    let mut orphan = env.store.get_job(&job).await.unwrap().unwrap();
    orphan.id = ArchiveJobId::generate();
    orphan.state = JobState::Pending;
    orphan.finished_at = None;
    env.store.insert_job(orphan.clone()).await.unwrap();

    let recovered = env.archives.recover_orphans().await.unwrap();
    assert_eq!(recovered, vec![orphan.id.clone()]);
    let row = env.store.get_job(&orphan.id).await.unwrap().unwrap();
    assert_eq!(row.state, JobState::Failed);
    assert_eq!(
        env.store.get_job(&job).await.unwrap().unwrap().state,
        JobState::Ready
    );
}
