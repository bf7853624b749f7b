use bytes::Bytes;
use chunkscope_clients::{
    psth_histogram, ClientConfig, LoadStatus, RetryPolicy, RoiClient, SpikeQuery,
    SpikeTrainsClient, TimeChunkedSpikeTrains, TrialWindow, VideoClient, VideoConfig,
};
use chunkscope_io::{FileSystemClient, LocalTransport, MemoryDatasetReader, ServiceHandler};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TIMES: &str = "/units/spike_times";

fn spike_reader(n: usize) -> Arc<MemoryDatasetReader> {
    // irregular but increasing
    let times: Vec<f64> = (0..n)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f64;
            i * 0.01 + (i * 0.37).sin().abs() * 0.004
        })
        .collect();
    Arc::new(
        MemoryDatasetReader::new()
            .with_latency(Duration::from_millis(2))
            .with_vec(TIMES, times)
            .with_vec("/units/spike_times_index", vec![times_len(n)])
            .with_vec("/units/id", vec![7.0]),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_range_query_reads_each_chunk_once() {
    let reader = spike_reader(10_000);
    let client = SpikeTrainsClient::new(
        reader.clone(),
        "/units",
        ClientConfig::default().with_chunk_size(4000),
    );
    client.load().await.unwrap();
    client.wait_for_loaded().await.unwrap();
    assert_eq!(client.status(), LoadStatus::Loaded);
    let (start, end) = client.time_range().await.unwrap();
    reader.reset_counts();

    let trains = client
        .get_data(start, end + 1.0, &SpikeQuery::all())
        .await
        .unwrap();
    assert_eq!(trains.len(), 1);
    assert_eq!(trains[0].unit_id, 7);
    assert_eq!(trains[0].times.len(), 10_000);
    assert_eq!(reader.read_count_for(TIMES), 3);

    let again = client
        .get_data(start, end + 1.0, &SpikeQuery::all())
        .await
        .unwrap();
    assert_eq!(again, trains);
    assert_eq!(reader.read_count_for(TIMES), 3);
}

#[tokio::test]
async fn test_narrow_window_fetches_few_chunks() {
    let reader = spike_reader(10_000);
    let client = SpikeTrainsClient::new(
        reader.clone(),
        "/units",
        ClientConfig::default().with_chunk_size(1000),
    );
    client.load().await.unwrap();
    reader.reset_counts();

    let trains = client
        .get_data(50.0, 51.0, &SpikeQuery::units([7]))
        .await
        .unwrap();
    assert!(trains[0].times.iter().all(|&t| (50.0..51.0).contains(&t)));
    assert!(!trains[0].times.is_empty());
    // the search probes a handful of chunks, never all ten
    assert!(reader.read_count_for(TIMES) < 10);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let reader = spike_reader(500);
    let config = ClientConfig::default()
        .with_chunk_size(100)
        .with_retry(RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(4)));
    let client = SpikeTrainsClient::new(reader.clone(), "/units", config);
    client.load().await.unwrap();
    reader.fail_next(TIMES, 2);
    let all = client.unit_spike_train(7).await.unwrap();
    assert_eq!(all.len(), 500);
}

#[tokio::test]
async fn test_trial_aligned_psth() {
    let reader = spike_reader(2000);
    let client = SpikeTrainsClient::new(reader, "/units", ClientConfig::default());
    let window = TrialWindow::new(-0.1, 0.2);
    let trials = client.trial_aligned(7, &[1.0, 5.0, 12.0], window).await.unwrap();
    assert_eq!(trials.len(), 3);
    for trial in &trials {
        assert!(trial.iter().all(|&t| (-0.1..0.2).contains(&t)));
        assert!(trial.len() >= 28 && trial.len() <= 31);
    }
    let psth = psth_histogram(&trials, window, 0.05);
    assert_eq!(psth.rates.len(), 6);
    // roughly one spike per 10 ms
    assert!(psth.rates.iter().all(|&r| r > 60.0 && r < 140.0));
}

#[tokio::test]
async fn test_roi_on_irregular_time_base() {
    let timestamps: Vec<f64> = (0..300).map(|i| f64::from(i) * 0.1 + 0.05).collect();
    let data: Vec<f64> = (0..300).flat_map(|s| [f64::from(s), -f64::from(s)]).collect();
    let reader = Arc::new(
        MemoryDatasetReader::new()
            .with_vec("/roi/timestamps", timestamps)
            .with_dataset(
                "/roi/data",
                vec![300, 2],
                chunkscope_io::Dtype::F32,
                data,
                serde_json::Map::new(),
            ),
    );
    let client = RoiClient::new(reader, "/roi", ClientConfig::default().with_chunk_size(64));
    let sf = client.sampling_frequency().await.unwrap().unwrap();
    approx::assert_relative_eq!(sf, 10.0, epsilon = 1e-6);

    let data = client.get_data(6.0, 8.0, None).await.unwrap();
    assert_eq!(data.timestamps.len(), 20);
    approx::assert_relative_eq!(data.timestamps[0], 6.05, epsilon = 1e-9);
    assert_eq!(data.traces[0][0], 60.0);
    assert_eq!(data.traces[1][19], -79.0);
}

/// `video` service over a synthetic clip; frame payloads are tiny JPEG shells.
struct FakeVideo {
    frame_queries: AtomicUsize,
}

impl ServiceHandler for FakeVideo {
    fn handle(&self, query: &Value) -> chunkscope_io::Result<(Value, Option<Bytes>)> {
        match query["type"].as_str() {
            Some("get_video_info") => Ok((
                json!({"info": {"width": 64, "height": 48, "fps": 25.0, "frame_count": 50}}),
                None,
            )),
            Some("get_video_frames") => {
                self.frame_queries.fetch_add(1, Ordering::SeqCst);
                assert_eq!(query["quality"], 40);
                let start = query["start_frame"].as_u64().unwrap_or(0);
                let end = query["end_frame"].as_u64().unwrap_or(0);
                let mut payload = Vec::new();
                for frame in start..end {
                    payload.extend_from_slice(&[0xFF, 0xD8, u8::try_from(frame).unwrap(), 0xFF, 0xD9]);
                }
                Ok((json!({}), Some(Bytes::from(payload))))
            }
            _ => Err(chunkscope_io::Error::Protocol("bad query".into())),
        }
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_video_frames_are_chunked_and_prefetched() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(FakeVideo {
        frame_queries: AtomicUsize::new(0),
    });
    let transport = LocalTransport::new(dir.path()).unwrap();
    transport.register_service("video", service.clone());
    let fs = Arc::new(FileSystemClient::new(Arc::new(transport)));
    let client = VideoClient::new(fs, "rtcshare://clip.avi", VideoConfig::default(), &ClientConfig::default());

    let info = client.info().await.unwrap();
    assert_eq!((info.width, info.height, info.frame_count), (64, 48, 50));

    let frame = client.frame(3).await.unwrap();
    assert_eq!(&frame[..], &[0xFF, 0xD8, 3, 0xFF, 0xD9]);
    wait_until(|| client.is_chunk_cached(1)).await;
    assert_eq!(service.frame_queries.load(Ordering::SeqCst), 2);

    assert_eq!(client.frame(25).await.unwrap()[2], 25);
    wait_until(|| client.is_chunk_cached(2)).await;
    // the last chunk holds frames 40..50 and triggers no further prefetch
    assert_eq!(client.frame(49).await.unwrap()[2], 49);
    assert_eq!(service.frame_queries.load(Ordering::SeqCst), 3);
    assert!(client.frame(50).await.is_err());
}

/// Deterministic pseudo-random sequence for test data.
struct Lcg(u64);

impl Lcg {
    fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 11
    }

    #[allow(clippy::cast_precision_loss)]
    fn next_f64(&mut self) -> f64 {
        self.next_u64() as f64 / (1u64 << 53) as f64
    }
}

/// Units laid out back to back with unrelated start times, so the first
/// value of the flat dataset is not the earliest spike.
fn ragged_units(rng: &mut Lcg, num_units: usize) -> (Arc<MemoryDatasetReader>, Vec<f64>) {
    let mut times = Vec::new();
    let mut ends = Vec::new();
    for unit in 0..num_units {
        let mut t = if unit == 0 {
            30.0
        } else {
            rng.next_f64() * 40.0 - 20.0
        };
        let count = 20 + rng.next_u64() % 200;
        for _ in 0..count {
            t += rng.next_f64() * 0.8;
            times.push(t);
        }
        ends.push(times_len(times.len()));
    }
    let ids = (0..num_units).map(|i| times_len(100 + i)).collect();
    let reader = MemoryDatasetReader::new()
        .with_vec(TIMES, times.clone())
        .with_vec("/units/spike_times_index", ends)
        .with_vec("/units/id", ids);
    (Arc::new(reader), times)
}

#[tokio::test]
async fn test_time_chunks_match_direct_queries() {
    let mut rng = Lcg(0x5eed);
    let (reader, times) = ragged_units(&mut rng, 5);
    let config = ClientConfig::default();
    let client = Arc::new(SpikeTrainsClient::new(reader, "/units", config));
    let chunked = TimeChunkedSpikeTrains::new(Arc::clone(&client), &config).with_chunk_duration(7.5);

    let (flat_start, _) = client.time_range().await.unwrap();
    let earliest = times.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(earliest < flat_start);

    let mut windows = vec![(earliest - 5.0, flat_start), (-100.0, 500.0)];
    for _ in 0..40 {
        let t1 = rng.next_f64() * 220.0 - 40.0;
        windows.push((t1, t1 + rng.next_f64() * 25.0));
    }
    for (i, (t1, t2)) in windows.into_iter().enumerate() {
        let query = if i % 3 == 0 {
            SpikeQuery::all().aligned_to(t1 + 3.0)
        } else {
            SpikeQuery::all()
        };
        let direct = client.get_data(t1, t2, &query).await.unwrap();
        let cached = chunked.get_data(t1, t2, &query).await.unwrap();
        assert_eq!(cached, direct, "window [{t1}, {t2})");
    }
    let total: usize = chunked
        .get_data(-100.0, 500.0, &SpikeQuery::all())
        .await
        .unwrap()
        .iter()
        .map(|t| t.times.len())
        .sum();
    assert_eq!(total, times.len());
}

#[allow(clippy::cast_precision_loss)]
fn times_len(n: usize) -> f64 {
    n as f64
}
