#![cfg(all(feature = "criterion-bench", feature = "memory-store"))]

use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use futures::executor::block_on;
use rs_mediastore::{
    AccessGrant, AccountId, Actor, Album, AlbumId, AlbumStore, CapabilityResolver, Decision,
    GrantStore, GrantTarget, MediaFormat, MediaId, MediaItem, MediaLink, MediaStore,
    MembershipStore, MemoryStore, Operation, Origin, ShareToken, ShareTokenId, ShareTokenStore,
    Target,
};
use std::sync::Arc;

struct Setup {
    resolver: CapabilityResolver<MemoryStore>,
    store: Arc<MemoryStore>,
    owner: AccountId,
    album: AlbumId,
}

fn setup() -> Setup {
    let store = Arc::new(MemoryStore::new());
    let owner = AccountId::try_from("owner_bench").unwrap();
    let album = AlbumId::generate();
    block_on(store.create_album(Album {
        id: album.clone(),
        title: "bench".into(),
        description: String::new(),
        owner: owner.clone(),
        created_at: Utc::now(),
    }))
    .unwrap();
    Setup {
        resolver: CapabilityResolver::new(Arc::clone(&store)),
        store,
        owner,
        album,
    }
}

fn add_linked_media(setup: &Setup, count: usize) -> Vec<MediaId> {
    (0..count)
        .map(|_| {
            let id = MediaId::generate();
            block_on(setup.store.insert_media(MediaItem {
                id: id.clone(),
                original_file_name: "bench.jpg".into(),
                storage_name: format!("{id}.jpg"),
                compressed_name: None,
                format: MediaFormat::Jpeg,
                uploaded_by: Origin::Account(setup.owner.clone()),
                uploaded_at: Utc::now(),
            }))
            .unwrap();
            block_on(setup.store.link_media(MediaLink {
                album: setup.album.clone(),
                media: id.clone(),
                added_by: Origin::Account(setup.owner.clone()),
                added_at: Utc::now(),
            }))
            .unwrap();
            id
        })
        .collect()
}

fn bench_album(c: &mut Criterion) {
    let mut group = c.benchmark_group("album_decisions");
    group.sample_size(30);
    group.throughput(Throughput::Elements(1));

    let setup = setup();
    let owner = Actor::account(setup.owner.clone());
    let target = Target::Album(setup.album.clone());
    assert_eq!(
        block_on(setup.resolver.evaluate(&owner, Operation::EDIT_ALBUM, &target)),
        Decision::Allow
    );
    group.bench_function("owner_edit", |b| {
        b.iter(|| {
            black_box(block_on(setup.resolver.evaluate(
                &owner,
                Operation::EDIT_ALBUM,
                &target,
            )));
        });
    });

    let token = ShareToken {
        id: ShareTokenId::generate(),
        album: setup.album.clone(),
        issuer: setup.owner.clone(),
        token: rs_mediastore::generate_token(32),
        can_edit: false,
        created_at: Utc::now(),
        expires_at: Utc::now() + Duration::days(1),
    };
    block_on(setup.store.insert_token(token.clone())).unwrap();
    let guest = Actor::token(token);
    group.bench_function("token_view", |b| {
        b.iter(|| {
            black_box(block_on(setup.resolver.evaluate(
                &guest,
                Operation::VIEW_ALBUM,
                &target,
            )));
        });
    });

    let stranger = Actor::account(AccountId::try_from("stranger_bench").unwrap());
    group.bench_function("stranger_deny", |b| {
        b.iter(|| {
            let decision =
                block_on(setup.resolver.evaluate(&stranger, Operation::VIEW_ALBUM, &target));
            assert_eq!(decision, Decision::Deny);
            black_box(decision);
        });
    });

    group.finish();
}

fn bench_media_membership_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("media_view_via_album");
    group.sample_size(30);
    group.throughput(Throughput::Elements(1));

    for count in [1usize, 32, 256] {
        let setup = setup();
        let media = add_linked_media(&setup, count);
        let viewer = AccountId::try_from("viewer_bench").unwrap();
        block_on(setup.store.upsert_grant(AccessGrant::new(
            viewer.clone(),
            GrantTarget::Album(setup.album.clone()),
            false,
        )))
        .unwrap();
        let actor = Actor::account(viewer);
        let target = Target::Media(media[count - 1].clone());

        let id = BenchmarkId::from_parameter(count);
        group.bench_with_input(id, &count, |b, _| {
            b.iter(|| {
                black_box(block_on(setup.resolver.evaluate(
                    &actor,
                    Operation::VIEW_MEDIA,
                    &target,
                )));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_album, bench_media_membership_fanout);
criterion_main!(benches);
