//! Video frames served by the `video` service as runs of MJPEG frames.

use bytes::Bytes;
use chunkscope_core::util::{f64_to_usize_clamped, u64_to_f64, u64_to_usize, usize_to_u64};
use chunkscope_core::{
    Canceler, ChunkCache, ChunkKey, ClientConfig, Error, LoadStatus, ResourceId, Result,
    StatusCell,
};
use chunkscope_io::FileSystemClient;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Name of the server-side video service.
pub const VIDEO_SERVICE: &str = "video";

/// Frame fetching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    /// Frames requested per chunk.
    pub frames_per_chunk: u64,
    /// JPEG quality requested from the service (1-100).
    pub quality: u8,
    /// Fetch the following chunk in the background after serving a frame.
    pub prefetch: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frames_per_chunk: 20,
            quality: 40,
            prefetch: true,
        }
    }
}

impl VideoConfig {
    /// Set the chunk length (at least one frame).
    #[must_use]
    pub fn with_frames_per_chunk(mut self, frames: u64) -> Self {
        self.frames_per_chunk = frames.max(1);
        self
    }

    /// Set the JPEG quality, clamped to 1-100.
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Enable or disable background prefetch.
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the JPEG quality.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] outside 1-100.
    pub fn try_with_quality(mut self, quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(Error::ConfigError(format!(
                "video quality must be within 1-100, got {quality}"
            )));
        }
        self.quality = quality;
        Ok(self)
    }
}

/// Dimensions and timing reported by the video service.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct VideoInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub fps: f64,
    /// Total number of frames.
    pub frame_count: u64,
}

impl VideoInfo {
    fn from_value(value: &Value) -> Result<Self> {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_f64)
                .ok_or_else(|| Error::InvalidData(format!("video info lacks {name}")))
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let info = Self {
            width: field("width")?.max(0.0) as u32,
            height: field("height")?.max(0.0) as u32,
            fps: field("fps")?,
            frame_count: field("frame_count")?.max(0.0) as u64,
        };
        Ok(info)
    }

    /// Video duration in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            u64_to_f64(self.frame_count) / self.fps
        } else {
            0.0
        }
    }

    /// Frame shown at time `t` (seconds from the start), clamped.
    #[must_use]
    pub fn frame_for_time(&self, t: f64) -> u64 {
        if self.frame_count == 0 || t.is_nan() || t <= 0.0 || self.fps <= 0.0 {
            return 0;
        }
        let frame = f64_to_usize_clamped(
            (t * self.fps).floor(),
            u64_to_usize(self.frame_count - 1),
        );
        usize_to_u64(frame)
    }

    /// Start time of `frame` in seconds.
    #[must_use]
    pub fn time_for_frame(&self, frame: u64) -> f64 {
        if self.fps > 0.0 {
            u64_to_f64(frame) / self.fps
        } else {
            0.0
        }
    }
}

/// Split a multiplexed MJPEG stream into JPEG images.
///
/// Each image runs from a start-of-image marker (`FF D8`) to the next
/// end-of-image marker (`FF D9`) inclusive. Bytes between images and a
/// trailing unterminated image are dropped.
#[must_use]
pub fn split_mjpeg(stream: &Bytes) -> Vec<Bytes> {
    let mut frames = Vec::new();
    let mut start = None;
    let mut i = 0;
    while i + 1 < stream.len() {
        match (stream[i], stream[i + 1]) {
            (0xFF, 0xD8) if start.is_none() => {
                start = Some(i);
                i += 2;
            }
            (0xFF, 0xD9) => {
                if let Some(s) = start.take() {
                    frames.push(stream.slice(s..i + 2));
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    frames
}

/// Frame client for one video file.
pub struct VideoClient {
    fs: Arc<FileSystemClient>,
    uri: String,
    resource: ResourceId,
    video: VideoConfig,
    status: StatusCell,
    info: OnceCell<VideoInfo>,
    chunks: ChunkCache<ChunkKey, Vec<Bytes>>,
    canceler: Canceler,
}

impl VideoClient {
    /// Create a client for the video at `uri`.
    pub fn new(
        fs: Arc<FileSystemClient>,
        uri: impl Into<String>,
        video: VideoConfig,
        config: &ClientConfig,
    ) -> Self {
        let uri = uri.into();
        Self {
            fs,
            resource: ResourceId::new(&uri),
            uri,
            video,
            status: StatusCell::new(),
            info: OnceCell::new(),
            chunks: ChunkCache::new(config.retry, config.failure_policy),
            canceler: Canceler::new(),
        }
    }

    /// Current load status.
    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status.get()
    }

    /// Wait until the video info is loaded.
    ///
    /// # Errors
    /// Returns [`Error::LoadFailed`] if loading failed.
    pub async fn wait_for_loaded(&self) -> Result<()> {
        self.status.wait_for_loaded().await
    }

    /// Fetch the video info.
    ///
    /// # Errors
    /// Returns an error if the service query fails.
    pub async fn load(&self) -> Result<()> {
        self.info().await.map(|_| ())
    }

    /// Cancel outstanding work and drop cached frames.
    pub fn close(&self) {
        self.canceler.cancel();
        self.chunks.clear();
    }

    /// Dimensions, frame rate and frame count.
    ///
    /// # Errors
    /// Returns an error if the service query fails or the reply is malformed.
    pub async fn info(&self) -> Result<VideoInfo> {
        self.canceler.check()?;
        self.info
            .get_or_try_init(|| async {
                self.status.begin_loading();
                let outcome = self.fetch_info().await;
                self.status.finish(&outcome);
                outcome
            })
            .await
            .copied()
    }

    async fn fetch_info(&self) -> Result<VideoInfo> {
        let reply = self
            .fs
            .service_query(
                VIDEO_SERVICE,
                json!({"type": "get_video_info", "path": self.uri}),
            )
            .await?;
        let info = reply
            .result
            .get("info")
            .ok_or_else(|| Error::InvalidData(format!("{}: no video info", self.uri)))?;
        let info = VideoInfo::from_value(info)?;
        log::debug!(
            "{}: {}x{} at {} fps, {} frames",
            self.uri,
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
        Ok(info)
    }

    fn chunk_key(&self, index: u64) -> ChunkKey {
        ChunkKey::new(self.resource.clone(), index)
    }

    fn chunk(&self, info: VideoInfo, index: u64) -> BoxFuture<'static, Result<Arc<Vec<Bytes>>>> {
        let fs = Arc::clone(&self.fs);
        let uri = self.uri.clone();
        let video = self.video;
        self.chunks.get(self.chunk_key(index), move || {
            let fs = Arc::clone(&fs);
            let uri = uri.clone();
            async move {
                let start = index * video.frames_per_chunk;
                let end = (start + video.frames_per_chunk).min(info.frame_count);
                let reply = fs
                    .service_query(
                        VIDEO_SERVICE,
                        json!({
                            "type": "get_video_frames",
                            "path": uri,
                            "start_frame": start,
                            "end_frame": end,
                            "quality": video.quality,
                        }),
                    )
                    .await?;
                let payload = reply.payload.ok_or_else(|| {
                    Error::InvalidData(format!("{uri}: frames {start}..{end} had no payload"))
                })?;
                let frames = split_mjpeg(&payload);
                log::debug!("{uri}: chunk {index} holds {} frames", frames.len());
                Ok(frames)
            }
        })
    }

    /// JPEG image of frame `frame`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] past the last frame, [`Error::Canceled`]
    /// after [`Self::close`], or a fetch error.
    pub async fn frame(&self, frame: u64) -> Result<Bytes> {
        let info = self.info().await?;
        if frame >= info.frame_count {
            return Err(Error::NotFound(format!(
                "{}: frame {frame} of {}",
                self.uri, info.frame_count
            )));
        }
        let n = self.video.frames_per_chunk;
        let index = frame / n;
        let frames = self.canceler.finish(self.chunk(info, index)).await?;
        if self.video.prefetch && (index + 1) * n < info.frame_count {
            self.prefetch(info, index + 1);
        }
        frames
            .get(u64_to_usize(frame % n))
            .cloned()
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "{}: chunk {index} returned {} frames",
                    self.uri,
                    frames.len()
                ))
            })
    }

    fn prefetch(&self, info: VideoInfo, index: u64) {
        let key = self.chunk_key(index);
        if self.chunks.contains(&key) || self.chunks.is_pending(&key) {
            return;
        }
        let fetch = self.chunk(info, index);
        let uri = self.uri.clone();
        tokio::spawn(async move {
            if let Err(err) = fetch.await {
                log::debug!("{uri}: prefetch of chunk {index} failed: {err}");
            }
        });
    }

    /// Whether chunk `index` is cached.
    #[must_use]
    pub fn is_chunk_cached(&self, index: u64) -> bool {
        self.chunks.contains(&self.chunk_key(index))
    }
}

impl Drop for VideoClient {
    fn drop(&mut self) {
        self.canceler.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjpeg_stream_splits_on_markers() {
        let stream = Bytes::from_static(&[
            0x00, 0xFF, 0xD8, 1, 2, 0xFF, 0xD9, 0x11, 0xFF, 0xD8, 3, 0xFF, 0xD9, 0xFF, 0xD8, 4,
        ]);
        let frames = split_mjpeg(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
        assert_eq!(&frames[1][..], &[0xFF, 0xD8, 3, 0xFF, 0xD9]);
        assert!(split_mjpeg(&Bytes::new()).is_empty());
    }

    #[test]
    fn frame_time_helpers() {
        let info = VideoInfo {
            width: 640,
            height: 480,
            fps: 30.0,
            frame_count: 300,
        };
        approx::assert_relative_eq!(info.duration(), 10.0);
        assert_eq!(info.frame_for_time(1.0), 30);
        assert_eq!(info.frame_for_time(-1.0), 0);
        assert_eq!(info.frame_for_time(1e9), 299);
        approx::assert_relative_eq!(info.time_for_frame(45), 1.5);
    }

    #[test]
    fn config_clamps() {
        let config = VideoConfig::default().with_frames_per_chunk(0).with_quality(0);
        assert_eq!(config.frames_per_chunk, 1);
        assert_eq!(config.quality, 1);
        assert!(VideoConfig::default().try_with_quality(101).is_err());
    }
}
