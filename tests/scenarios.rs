#![cfg(feature = "memory-store")]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rs_mediastore::{
    AccountId, Actor, AlbumStore, CapabilityResolver, CompressionQueue, Config, Decision, Error,
    GrantStore, GrantTarget, LifecycleCoordinator, LocalArtifactStore, MediaService,
    MembershipStore, MemoryStore, Operation, ShareTokenService, ShareTokenStore, Target,
};
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

struct App {
    _temp: TempDir,
    store: Arc<MemoryStore>,
    resolver: CapabilityResolver<MemoryStore>,
    lifecycle: LifecycleCoordinator<MemoryStore>,
    tokens: ShareTokenService<MemoryStore>,
    media: MediaService<MemoryStore>,
}

async fn app() -> App {
    let temp = TempDir::new().unwrap();
    let config = Config::default().with_data_root(temp.path());
    let store = Arc::new(MemoryStore::new());
    let artifacts = Arc::new(LocalArtifactStore::from_config(&config).await.unwrap());
    let resolver = CapabilityResolver::new(Arc::clone(&store));
    let (queue, _receiver) = CompressionQueue::new(&config);
    App {
        _temp: temp,
        lifecycle: LifecycleCoordinator::new(resolver.clone(), artifacts.clone()),
        tokens: ShareTokenService::new(resolver.clone(), &config),
        media: MediaService::new(resolver.clone(), artifacts, queue),
        resolver,
        store,
    }
}

fn account(name: &str) -> AccountId {
    AccountId::try_from(name).unwrap()
}

#[tokio::test]
async fn read_only_link_lifecycle() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let album = app.lifecycle.create_album(&owner, "Wedding", "").await.unwrap();
    let grant = app
        .store
        .get_grant(&account("owner"), &GrantTarget::Album(album.id.clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(grant.can_edit);

    app.media
        .upload(&owner, "cake.png", PNG, Some(&album.id))
        .await
        .unwrap();
    let token = app
        .tokens
        .create(&owner, &album.id, Utc::now() + Duration::days(1), false)
        .await
        .unwrap();
    let guest = app.tokens.resolve_actor(None, Some(&token.token)).await.unwrap();

    let listed = app.media.list_album_media(&guest, &album.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    let err = app
        .media
        .upload(&guest, "extra.png", PNG, Some(&album.id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));

    app.lifecycle.delete_album(&owner, &album.id).await.unwrap();

    let err = app.tokens.get_by_token(&token.token).await.unwrap_err();
    assert!(err.is_not_found());
    for operation in [Operation::VIEW_ALBUM, Operation::EDIT_ALBUM] {
        let decision = app
            .resolver
            .evaluate(&guest, operation, &Target::Album(album.id.clone()))
            .await;
        assert_eq!(decision, Decision::Deny);
    }
    let err = app.media.list_album_media(&guest, &album.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn album_delete_leaves_nothing_behind() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let album = app.lifecycle.create_album(&owner, "Team", "").await.unwrap();
    for name in ["a", "b", "c"] {
        app.lifecycle
            .grant(&owner, account(name), GrantTarget::Album(album.id.clone()), name == "a")
            .await
            .unwrap();
    }
    for _ in 0..4 {
        app.media
            .upload(&owner, "shot.png", PNG, Some(&album.id))
            .await
            .unwrap();
    }
    for can_edit in [true, false] {
        app.tokens
            .create(&owner, &album.id, Utc::now() + Duration::hours(2), can_edit)
            .await
            .unwrap();
    }

    let report = app.lifecycle.delete_album(&owner, &album.id).await.unwrap();

    assert_eq!(report.links_removed, 4);
    assert_eq!(report.grants_revoked, 4);
    assert_eq!(report.tokens_deleted, 2);
    assert!(app.store.album_media(&album.id).await.unwrap().is_empty());
    assert!(
        app.store
            .grants_for_target(&GrantTarget::Album(album.id.clone()))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(app.store.tokens_for_album(&album.id).await.unwrap().is_empty());
    assert!(app.store.get_album(&album.id).await.unwrap().is_none());
    let err = app
        .media
        .list_album_media(&owner, &album.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    // Media items survive the album.
    assert_eq!(
        app.media
            .list_uploaded_by(&owner, &account("owner"))
            .await
            .unwrap()
            .len(),
        4
    );
}

#[tokio::test]
async fn regranting_keeps_one_row_with_latest_value() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let album = app.lifecycle.create_album(&owner, "Notes", "").await.unwrap();
    let target = GrantTarget::Album(album.id.clone());

    app.lifecycle
        .grant(&owner, account("friend"), target.clone(), true)
        .await
        .unwrap();
    app.lifecycle
        .grant(&owner, account("friend"), target.clone(), false)
        .await
        .unwrap();

    let grants: Vec<_> = app
        .lifecycle
        .list_grants(&owner, &target)
        .await
        .unwrap()
        .into_iter()
        .filter(|grant| grant.account == account("friend"))
        .collect();
    assert_eq!(grants.len(), 1);
    assert!(!grants[0].can_edit);
}

#[tokio::test]
async fn edit_implies_view_across_actor_kinds() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let album = app.lifecycle.create_album(&owner, "Mixed", "").await.unwrap();
    app.lifecycle
        .grant(&owner, account("editor"), GrantTarget::Album(album.id.clone()), true)
        .await
        .unwrap();
    app.lifecycle
        .grant(&owner, account("viewer"), GrantTarget::Album(album.id.clone()), false)
        .await
        .unwrap();
    let editing = app
        .tokens
        .create(&owner, &album.id, Utc::now() + Duration::hours(1), true)
        .await
        .unwrap();
    let reading = app
        .tokens
        .create(&owner, &album.id, Utc::now() + Duration::hours(1), false)
        .await
        .unwrap();

    let actors = vec![
        owner.clone(),
        Actor::account(account("editor")),
        Actor::account(account("viewer")),
        Actor::account(account("nobody")),
        Actor::token(editing.clone()),
        Actor::token(reading),
        Actor::account(account("nobody")).with_token(editing),
        Actor::anonymous(),
    ];
    for actor in &actors {
        if app.resolver.can_edit_album(actor, &album.id).await {
            assert!(app.resolver.can_view_album(actor, &album.id).await);
        }
    }
}

#[tokio::test]
async fn token_never_reaches_other_albums() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let shared = app.lifecycle.create_album(&owner, "Shared", "").await.unwrap();
    let private = app.lifecycle.create_album(&owner, "Private", "").await.unwrap();
    let hidden = app
        .media
        .upload(&owner, "secret.png", PNG, Some(&private.id))
        .await
        .unwrap();
    let token = app
        .tokens
        .create(&owner, &shared.id, Utc::now() + Duration::hours(1), true)
        .await
        .unwrap();
    let guest = Actor::token(token);

    assert!(!app.resolver.can_view_album(&guest, &private.id).await);
    assert!(!app.resolver.can_view_media(&guest, &hidden.id).await);
    let err = app
        .media
        .add_to_album(&guest, &shared.id, &hidden.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));
    assert!(!app.store.is_linked(&shared.id, &hidden.id).await.unwrap());
}

#[tokio::test]
async fn media_delete_is_uploader_only() {
    let app = app().await;
    let owner = Actor::account(account("owner"));
    let album = app.lifecycle.create_album(&owner, "Pics", "").await.unwrap();
    app.lifecycle
        .grant(&owner, account("editor"), GrantTarget::Album(album.id.clone()), true)
        .await
        .unwrap();
    let editor = Actor::account(account("editor"));
    let item = app
        .media
        .upload(&editor, "mine.png", PNG, Some(&album.id))
        .await
        .unwrap();

    let err = app.lifecycle.delete_media(&owner, &item.id).await.unwrap_err();
    assert!(matches!(err, Error::Denied { .. }));
    let report = app.lifecycle.delete_media(&editor, &item.id).await.unwrap();
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(report.grants_revoked, 1);
    assert!(app.store.album_media(&album.id).await.unwrap().is_empty());
}
