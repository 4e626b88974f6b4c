//! File manifest registration, listing, and cascading delete

mod common;

use strata::store::FileManifest;

use common::{make_chunk, TestStorage};

const GIB: u64 = 1024 * 1024 * 1024;

#[tokio::test]
async fn test_cascade_delete() -> anyhow::Result<()> {
    let storage = TestStorage::new(GIB).await?;
    let engine = &storage.engine;

    let chunks: Vec<_> = (0..5).map(|i| make_chunk(1024, i)).collect();
    engine
        .register_file(FileManifest::new("album.zip", "merkle-root-hex", 5 * 1024, 5))
        .await?;
    for (i, (hash, data)) in chunks.iter().enumerate() {
        engine.put_chunk(hash, data, "album.zip", i as u32).await?;
    }

    // A chunk from another file must survive
    let (other_hash, other_data) = make_chunk(64, 99);
    engine.put_chunk(&other_hash, &other_data, "other", 0).await?;

    assert_eq!(engine.delete_file("album.zip").await?, 5);
    for (hash, _) in &chunks {
        assert!(!engine.has_chunk(hash).await?);
    }
    assert!(engine.has_chunk(&other_hash).await?);

    let files = engine.list_files().await?;
    assert!(files.iter().all(|f| f.file_key != "album.zip"));
    assert!(engine.get_file("album.zip").await?.is_none());

    // Deleting again removes nothing
    assert_eq!(engine.delete_file("album.zip").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_manifest_totals_match_chunks() -> anyhow::Result<()> {
    let storage = TestStorage::new(GIB).await?;
    let engine = &storage.engine;

    let sizes = [4096usize, 4096, 1234];
    let total: u64 = sizes.iter().map(|s| *s as u64).sum();

    // Chunks first, manifest afterwards
    for (i, size) in sizes.iter().enumerate() {
        let (hash, data) = make_chunk(*size, i as u64);
        engine.put_chunk(&hash, &data, "doc.pdf", i as u32).await?;
    }
    engine
        .register_file(
            FileManifest::new("doc.pdf", "root", total, sizes.len() as u32)
                .with_metadata(serde_json::json!({ "name": "doc.pdf", "owner": "0xabc" })),
        )
        .await?;

    let record = engine.get_file("doc.pdf").await?.expect("registered");
    let chunks = engine.get_file_chunks("doc.pdf").await?;
    assert_eq!(chunks.iter().map(|c| c.size).sum::<u64>(), record.total_size);
    assert_eq!(chunks.len() as u32, record.chunk_count);
    assert_eq!(record.merkle_root, "root");
    assert_eq!(record.metadata.unwrap()["owner"], "0xabc");
    Ok(())
}

#[tokio::test]
async fn test_register_is_upsert_and_listing_is_newest_first() -> anyhow::Result<()> {
    let storage = TestStorage::new(GIB).await?;
    let engine = &storage.engine;

    engine.register_file(FileManifest::new("a", "r1", 10, 1)).await?;
    engine.register_file(FileManifest::new("b", "r2", 20, 2)).await?;
    engine.register_file(FileManifest::new("c", "r3", 30, 3)).await?;

    let keys: Vec<String> = engine.list_files().await?.into_iter().map(|f| f.file_key).collect();
    assert_eq!(keys, vec!["c", "b", "a"]);

    let before = engine.get_file("a").await?.expect("registered");
    engine.register_file(FileManifest::new("a", "r1-updated", 11, 1)).await?;
    let after = engine.get_file("a").await?.expect("registered");

    assert_eq!(after.merkle_root, "r1-updated");
    assert_eq!(after.total_size, 11);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(engine.get_stats().await?.total_files, 3);
    Ok(())
}

#[tokio::test]
async fn test_manifest_without_chunks() -> anyhow::Result<()> {
    let storage = TestStorage::new(GIB).await?;
    let engine = &storage.engine;

    engine.register_file(FileManifest::new("pending", "root", 100, 4)).await?;
    assert!(engine.get_file_chunks("pending").await?.is_empty());
    assert_eq!(engine.delete_file("pending").await?, 0);
    assert!(engine.list_files().await?.is_empty());
    Ok(())
}
