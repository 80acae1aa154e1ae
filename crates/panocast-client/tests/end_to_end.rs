//! End-to-end sessions: real server and client loops over an in-memory
//! duplex stream.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use panocast_client::{SessionSummary, Termination, ViewportTrace};
use panocast_common::{
    MemoryTileStore, SessionConfig, StoreError, TileHandle, TileKey, TileStore,
};
use panocast_server::ServerReport;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// One frame per segment at 4 fps, four tiles.
fn config(segments: u32, ladder: &str) -> SessionConfig {
    let toml = format!(
        r#"
version = 1

[video]
fps = 4
frames_per_segment = 1
segments = {segments}
tile_count = 4

[abr]
ladder_kbps = {ladder}

[session]
drain_timeout_ms = 1000
"#
    );
    SessionConfig::from_toml_str(&toml).unwrap()
}

fn server_store(bitrates: &[u32], segments: u32, tiles: &[u16]) -> Arc<MemoryTileStore> {
    let store = Arc::new(MemoryTileStore::new());
    for &bitrate in bitrates {
        for segment in 1..=segments {
            for &tile in tiles {
                let payload = vec![tile as u8; 32 * 1024 + tile as usize];
                store
                    .put(TileKey::new(segment, tile, bitrate), Bytes::from(payload))
                    .unwrap();
            }
        }
    }
    store
}

async fn run_session(
    config: &SessionConfig,
    server_store: Arc<MemoryTileStore>,
    trace: &ViewportTrace,
) -> (SessionSummary, ServerReport, Arc<MemoryTileStore>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn({
        let config = config.clone();
        async move { panocast_server::serve(server_io, server_store, &config).await }
    });

    let client_store = Arc::new(MemoryTileStore::new());
    let summary = panocast_client::run(client_io, client_store.clone(), trace, config, "1")
        .await
        .unwrap();
    let report = server.await.unwrap().unwrap();
    (summary, report, client_store)
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_segment_all_tiles_delivered() {
    let config = config(1, "[3000]");
    let trace = ViewportTrace::parse("0,1,2\n", 4).unwrap();
    let (summary, report, client_store) =
        run_session(&config, server_store(&[3000], 1, &[1, 2, 3, 4]), &trace).await;

    assert_eq!(summary.termination, Termination::Completed);
    let segment = &summary.segments[0];
    assert_eq!(segment.high_requests, 2);
    assert_eq!(segment.low_requests, 2);
    assert_eq!(segment.bitrate_kbps, 3000);

    for tile in 1..=4 {
        assert!(client_store.exists(&TileKey::new(1, tile, 3000)), "tile {tile}");
    }
    assert_eq!(summary.total_tiles, 4);
    assert_eq!(summary.missing_tiles, 0);
    assert_eq!(summary.missing_ratio_pct, 0.0);
    assert_eq!(summary.fov_tiles, 2);
    assert_eq!(summary.fov_missing_ratio_pct, 0.0);

    assert_eq!(report.client_id, "1");
    assert_eq!(report.stats.served_high, 2);
    assert_eq!(report.stats.served_low, 2);
    assert!(report.ended_by_client);
}

#[tokio::test]
async fn unanswered_tile_is_counted_missing() {
    let config = config(1, "[3000]");
    let trace = ViewportTrace::parse("0,1,2\n", 4).unwrap();
    let (summary, report, client_store) =
        run_session(&config, server_store(&[3000], 1, &[1, 2, 4]), &trace).await;

    assert!(!client_store.exists(&TileKey::new(1, 3, 3000)));
    assert_eq!(report.missing, 1);

    assert_eq!(summary.missing_tiles, 1);
    assert_eq!(summary.missing_ratio_pct, 25.0);
    assert_eq!(summary.segments[0].missing_tiles, 1);
    assert_eq!(summary.segments[0].missing_ratio_pct, 25.0);
    assert_eq!(summary.fov_missing_ratio_pct, 0.0);

    // the segment never completes, so playout stalls once
    assert!(!summary.segments[0].complete);
    assert_eq!(summary.stall_count, 1);
    assert_eq!(summary.stalled_frames, 1);
}

#[tokio::test]
async fn abr_steps_up_after_first_segment() {
    let config = config(2, "[3000, 6000]");
    let trace = ViewportTrace::parse("0,1\n1,2\n", 4).unwrap();
    let (summary, _, client_store) = run_session(
        &config,
        server_store(&[3000, 6000], 2, &[1, 2, 3, 4]),
        &trace,
    )
    .await;

    assert_eq!(summary.termination, Termination::Completed);
    assert_eq!(summary.segments[0].bitrate_kbps, 3000);
    assert!(summary.segments[0].complete);
    // in-memory delivery is far faster than 6000 kbps
    assert_eq!(summary.segments[1].bitrate_kbps, 6000);
    assert!(client_store.exists(&TileKey::new(2, 2, 6000)));
}

#[tokio::test]
async fn short_trace_ends_session_early() {
    let config = config(3, "[3000]");
    let trace = ViewportTrace::parse("0,1\n", 4).unwrap();
    let (summary, report, _) =
        run_session(&config, server_store(&[3000], 3, &[1, 2, 3, 4]), &trace).await;

    assert_eq!(summary.termination, Termination::TraceExhausted);
    assert_eq!(summary.segments.len(), 1);
    assert!(report.ended_by_client);
}

#[tokio::test]
async fn server_hangup_is_reported() {
    let config = config(4, "[3000]");
    let trace = ViewportTrace::parse("0,1\n1,1\n2,1\n3,1\n", 4).unwrap();

    let (client_io, server_io) = tokio::io::duplex(4096);
    // Reads a little, then drops the connection.
    let server = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut server_io = server_io;
        let mut buf = [0u8; 16];
        let _ = server_io.read(&mut buf).await;
        drop(server_io);
    });

    let store = Arc::new(MemoryTileStore::new());
    let summary = panocast_client::run(client_io, store, &trace, &config, "1")
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(summary.termination, Termination::TransportClosed);
    assert!(summary.frames_observed < 4);
    assert!(!summary.segments.iter().any(|s| s.complete));
}

#[tokio::test]
async fn oversized_envelope_ends_with_framing_fault() {
    let config = config(4, "[3000]");
    let trace = ViewportTrace::parse("0,1\n1,1\n2,1\n3,1\n", 4).unwrap();

    let (client_io, server_io) = tokio::io::duplex(4096);
    // Answers with a length prefix far above the envelope limit, then keeps
    // the stream open until the client goes away.
    let server = tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut server_io = server_io;
        let mut buf = [0u8; 256];
        let _ = server_io.read(&mut buf).await;
        server_io.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        while matches!(server_io.read(&mut buf).await, Ok(n) if n > 0) {}
    });

    let store = Arc::new(MemoryTileStore::new());
    let summary = panocast_client::run(client_io, store, &trace, &config, "1")
        .await
        .unwrap();
    server.await.unwrap();

    match &summary.termination {
        Termination::FramingFault(detail) => {
            assert!(detail.contains("4294967295"), "{detail}")
        }
        other => panic!("unexpected termination {other:?}"),
    }
    assert!(summary.frames_observed < 4);
    assert_eq!(summary.segments.len(), 1);
    assert!(!summary.segments[0].complete);
}

/// Accepts nothing: every write fails.
struct ReadOnlyStore;

impl TileStore for ReadOnlyStore {
    fn exists(&self, _key: &TileKey) -> bool {
        false
    }

    fn put(&self, key: TileKey, _bytes: Bytes) -> Result<bool, StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from(format!("read-only/{key}")),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn get(&self, _key: &TileKey) -> Result<Option<Bytes>, StoreError> {
        Ok(None)
    }

    fn size(&self, _key: &TileKey) -> Option<u64> {
        None
    }

    fn handle(&self, _key: &TileKey) -> Option<TileHandle> {
        None
    }
}

#[tokio::test]
async fn failed_store_write_ends_with_store_fault() {
    let config = config(4, "[3000]");
    let trace = ViewportTrace::parse("0,1\n1,1\n2,1\n3,1\n", 4).unwrap();

    // Large enough for the whole first segment, so the server is never
    // left blocked on a client that stopped reading.
    let (client_io, server_io) = tokio::io::duplex(1024 * 1024);
    let server = tokio::spawn({
        let config = config.clone();
        let store = server_store(&[3000], 4, &[1, 2, 3, 4]);
        async move { panocast_server::serve(server_io, store, &config).await }
    });

    let summary = panocast_client::run(client_io, Arc::new(ReadOnlyStore), &trace, &config, "1")
        .await
        .unwrap();
    let report = server.await.unwrap().unwrap();

    match &summary.termination {
        Termination::StoreFault(detail) => assert!(detail.contains("read-only"), "{detail}"),
        other => panic!("unexpected termination {other:?}"),
    }
    assert!(summary.frames_observed < 4);
    assert!(report.ended_by_client);
    assert_eq!(report.stats.served(), 4);
}
