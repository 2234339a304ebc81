mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use common::{build_pipeline, load_config, write_source, FakeFfmpeg};
use dashpack_core::asset::{AssetId, ProcessingMarker, MARKER_FILE_NAME};
use dashpack_core::library::{Library, LibraryError, NotReadyReason};
use dashpack_core::pipeline::IngestRequest;

#[tokio::test]
async fn listing_and_playback_follow_ingestion() {
    let base = TempDir::new().unwrap();
    let config = load_config(&base);
    let pipeline = build_pipeline(config.clone(), Arc::new(FakeFfmpeg::new()));
    let library = Library::from_config(pipeline.lifecycle().clone(), &config);

    for name in ["first", "second"] {
        let source = write_source(&base, &format!("{name}.mp4"));
        let request = IngestRequest::new(
            AssetId::parse(name).unwrap(),
            source,
            format!("{name} cut.mp4"),
        );
        pipeline.ingest(request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let listings = library.list().await.unwrap();
    let ids: Vec<_> = listings.iter().map(|listing| listing.id.as_str()).collect();
    assert_eq!(ids, vec!["second", "first"]);
    assert!(listings.iter().all(|listing| listing.is_ready));
    assert_eq!(listings[0].original_name, "second cut.mp4");
    assert_eq!(listings[0].thumbnail.as_deref(), Some("thumbnail.jpg"));

    let status = library.status("first").await.unwrap();
    assert!(status.is_ready);
    assert!(status.files.contains(&"output.mpd".to_string()));
    assert!(status.files.contains(&"meta.txt".to_string()));
    assert!(!status.files.contains(&MARKER_FILE_NAME.to_string()));

    let target = library.resolve_playback("first").await.unwrap();
    assert_eq!(target.title, "first cut.mp4");
    assert!(target.manifest_path.is_file());
}

#[tokio::test]
async fn abandoned_asset_is_unplayable_until_purged() {
    let base = TempDir::new().unwrap();
    let config = load_config(&base);
    let pipeline = build_pipeline(config.clone(), Arc::new(FakeFfmpeg::new()));
    let lifecycle = pipeline.lifecycle().clone();
    let library = Library::from_config(lifecycle.clone(), &config);

    let id = AssetId::parse("crashed").unwrap();
    let dir = lifecycle.directory(&id);
    std::fs::create_dir_all(&dir).unwrap();
    let fresh = ProcessingMarker::new(Uuid::new_v4());
    std::fs::write(dir.join(MARKER_FILE_NAME), fresh.render()).unwrap();
    std::fs::write(dir.join("output.mpd"), "<MPD/>").unwrap();

    let status = library.status("crashed").await.unwrap();
    assert!(status.is_processing);
    assert!(!status.is_ready);
    assert!(matches!(
        library.resolve_playback("crashed").await,
        Err(LibraryError::AssetNotReady {
            reason: NotReadyReason::Processing,
            ..
        })
    ));

    assert!(lifecycle.purge_abandoned().await.unwrap().is_empty());
    assert!(library.status("crashed").await.unwrap().is_processing);

    let abandoned = ProcessingMarker {
        pid: 1,
        started_at: Utc::now() - chrono::Duration::hours(7),
        token: Uuid::new_v4(),
    };
    std::fs::write(dir.join(MARKER_FILE_NAME), abandoned.render()).unwrap();
    let purged = lifecycle.purge_abandoned().await.unwrap();
    assert_eq!(purged, vec![id.clone()]);
    assert!(!library.status("crashed").await.unwrap().exists);
    assert!(matches!(
        library.resolve_playback("crashed").await,
        Err(LibraryError::AssetNotFound(_))
    ));
}
