use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};

use super::metrics::TransferMetrics;
use super::transport::{HttpTransport, Transport};

const MIB: u64 = 1024 * 1024;

/// Tuning knobs for a [`RangeStream`].
///
/// The defaults are hand-tuned for archive access patterns: structural
/// metadata clusters at the head and tail of a resource, and member
/// extraction is dominated by long sequential scans. None of the values
/// affect correctness, only request count and memory use.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Size of each metadata region (head and tail) prefetched at open.
    pub prefetch_size: u64,
    /// Smallest range ever fetched; small reads are rounded up to this to
    /// amortize HTTP overhead across likely follow-up reads.
    pub min_fetch_size: u64,
    /// Reads at or above this count as "large" and use the big window.
    pub large_request_threshold: u64,
    /// Window used for large reads. A single window of this size is
    /// resident per stream at a time.
    pub max_fetch_size: u64,
    /// Attempts per fetch before the last transport error is surfaced.
    pub max_retries: u32,
    /// Linear backoff step: attempt `n` sleeps `n * backoff_step`.
    pub backoff_step: Duration,
    /// Minimum `Retry-After` honored for a 429, in units.
    pub retry_after_floor: u64,
    /// Duration of one `Retry-After` unit. One second over real HTTP;
    /// tests shrink it so rate-limit paths run in milliseconds.
    pub retry_after_unit: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            prefetch_size: 2 * MIB,
            min_fetch_size: 25 * MIB,
            large_request_threshold: 10 * MIB,
            max_fetch_size: 100 * MIB,
            max_retries: 5,
            backoff_step: Duration::from_secs(2),
            retry_after_floor: 1,
            retry_after_unit: Duration::from_secs(1),
        }
    }
}

/// `Retry-After` assumed when a 429 carries none.
const DEFAULT_RETRY_AFTER: u64 = 3;

/// One contiguous cached byte range of the resource.
#[derive(Debug, Clone)]
struct CacheRegion {
    /// Absolute offset of the first cached byte.
    start: u64,
    data: Bytes,
}

impl CacheRegion {
    /// One past the last cached byte, as an absolute offset.
    fn end_exclusive(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// A request is satisfiable from a region iff it fits entirely inside.
    fn contains(&self, pos: u64, len: u64) -> bool {
        !self.data.is_empty() && pos >= self.start && pos + len <= self.end_exclusive()
    }

    fn slice(&self, pos: u64, len: u64) -> Bytes {
        let offset = (pos - self.start) as usize;
        self.data.slice(offset..offset + len as usize)
    }
}

struct StreamInner {
    transport: Box<dyn Transport>,
    config: StreamConfig,
    /// Total resource size; 0 when the server never reported one, which
    /// degrades every read to immediate EOF but keeps the stream usable.
    size: u64,
    /// Logical cursor. May sit past EOF between a seek and the next read.
    position: u64,
    /// The single live data region, wholesale-replaced on every miss.
    buffer: Option<CacheRegion>,
    /// Permanently cached head/tail regions, populated once at open.
    head: Option<CacheRegion>,
    tail: Option<CacheRegion>,
    metrics: Arc<TransferMetrics>,
}

/// A lazily-populated, seekable, read-only view of an HTTP(S) resource.
///
/// Reads are served from cached regions when possible and otherwise
/// trigger a single range fetch sized by the config heuristics. Seeking is
/// pure position arithmetic and never touches the network.
///
/// The handle is cheap to clone; clones share one cursor and one cache, so
/// a stream must only be driven by one decoder at a time.
pub struct RangeStream {
    inner: Arc<Mutex<StreamInner>>,
    metrics: Arc<TransferMetrics>,
}

impl Clone for RangeStream {
    fn clone(&self) -> Self {
        RangeStream {
            inner: Arc::clone(&self.inner),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl RangeStream {
    /// Open a stream over `url` with default tuning.
    pub fn open(url: &str) -> Result<Self> {
        let transport = HttpTransport::new(url).map_err(|message| Error::Transport {
            attempts: 0,
            message,
        })?;
        Self::open_with(Box::new(transport), StreamConfig::default())
    }

    /// Open a stream over an arbitrary transport.
    ///
    /// Probes the resource with a minimal `bytes=0-0` GET: one round trip
    /// both confirms range support and reveals the total size from the
    /// `Content-Range` total (falling back to `Content-Length`). Then
    /// best-effort prefetches the head and tail metadata regions.
    pub fn open_with(transport: Box<dyn Transport>, config: StreamConfig) -> Result<Self> {
        let metrics = TransferMetrics::new();

        let probe = transport.get_range(0, 0).map_err(|message| {
            metrics.record_failed_request();
            Error::Transport {
                attempts: 1,
                message,
            }
        })?;

        if !probe.is_range_ok() {
            metrics.record_failed_request();
            return Err(Error::Connect {
                status: probe.status,
            });
        }
        metrics.record_request(probe.body.len() as u64, 0, 1);

        let size = probe.total_size.or(probe.content_length).unwrap_or(0);

        let mut inner = StreamInner {
            transport,
            config,
            size,
            position: 0,
            buffer: None,
            head: None,
            tail: None,
            metrics: Arc::clone(&metrics),
        };
        inner.prefetch_metadata();

        Ok(RangeStream {
            inner: Arc::new(Mutex::new(inner)),
            metrics,
        })
    }

    /// Total resource size in bytes (0 if the server never reported one).
    pub fn len(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current logical cursor position.
    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }

    /// Network activity counters for this stream.
    pub fn metrics(&self) -> Arc<TransferMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl StreamInner {
    /// Cache the first and last `prefetch_size` bytes of the resource.
    ///
    /// Archive formats keep central directories and footers there, and
    /// decoders probe them with dozens of tiny reads. Failures are
    /// swallowed: a missing region costs requests later, never correctness.
    fn prefetch_metadata(&mut self) {
        if self.size == 0 {
            return;
        }

        let head_len = self.config.prefetch_size.min(self.size);
        self.head = self.fetch_region_quiet(0, head_len);

        // Skip the tail when the head already covers the whole resource.
        if self.size > head_len {
            let tail_len = self.config.prefetch_size.min(self.size);
            let tail_start = self.size - tail_len;
            self.tail = self.fetch_region_quiet(tail_start, tail_len);
        }
    }

    /// Single-attempt fetch used by the prefetch; errors become `None`.
    fn fetch_region_quiet(&mut self, start: u64, len: u64) -> Option<CacheRegion> {
        match self.transport.get_range(start, start + len - 1) {
            Ok(resp) if resp.is_range_ok() && !resp.body.is_empty() => {
                self.metrics
                    .record_request(resp.body.len() as u64, start, len);
                // A 200 means the server ignored the range and sent the
                // whole resource from offset zero.
                let region_start = if resp.status == 200 { 0 } else { start };
                Some(CacheRegion {
                    start: region_start,
                    data: resp.body,
                })
            }
            _ => {
                self.metrics.record_failed_request();
                None
            }
        }
    }

    /// Serve `pos..pos+len` from a cached region, metadata regions first.
    fn lookup(&self, pos: u64, len: u64) -> Option<Bytes> {
        for region in [&self.head, &self.tail, &self.buffer].into_iter().flatten() {
            if region.contains(pos, len) {
                return Some(region.slice(pos, len));
            }
        }
        None
    }

    fn read_impl(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Clamp to EOF; a cursor parked past the end reads empty, never errors.
        let want = (buf.len() as u64).min(self.size.saturating_sub(self.position));
        if want == 0 {
            return Ok(0);
        }

        if let Some(data) = self.lookup(self.position, want) {
            buf[..data.len()].copy_from_slice(&data);
            self.position += data.len() as u64;
            self.metrics.record_cache_hit();
            return Ok(data.len());
        }

        // Miss: one fetch replaces the buffer region and is sized to cover
        // the whole request, so a second lookup is guaranteed to hit. The
        // partial fallback below only fires when a server returns a short
        // 206 body.
        self.fetch(want)?;

        if let Some(data) = self.lookup(self.position, want) {
            buf[..data.len()].copy_from_slice(&data);
            self.position += data.len() as u64;
            return Ok(data.len());
        }

        if let Some(region) = &self.buffer {
            if self.position >= region.start && self.position < region.end_exclusive() {
                let available = region.end_exclusive() - self.position;
                let take = want.min(available);
                let data = region.slice(self.position, take);
                buf[..data.len()].copy_from_slice(&data);
                self.position += data.len() as u64;
                return Ok(data.len());
            }
        }

        // The fetch either covers the request or errors, so this is a
        // server that answered with bytes outside the asked range.
        Err(Error::EmptyRange {
            start: self.position,
            end: self.position + want - 1,
        })
    }

    /// Fetch a region starting at the cursor into the buffer slot.
    fn fetch(&mut self, want: u64) -> Result<()> {
        let fetch_size = fetch_span(want, self.size - self.position, &self.config);
        let start = self.position;
        let end = start + fetch_size - 1;

        let mut attempts: u32 = 0;
        loop {
            let failure = match self.transport.get_range(start, end) {
                Ok(resp) if resp.status == 429 => {
                    // Rate limiting is expected, not a failure: honor the
                    // server's delay and retry without touching the budget.
                    let units = resp
                        .retry_after
                        .unwrap_or(DEFAULT_RETRY_AFTER)
                        .max(self.config.retry_after_floor);
                    let wait = rate_limit_wait(&self.config, units);
                    self.metrics.record_failed_request();
                    self.metrics.record_rate_limit_wait(wait);
                    std::thread::sleep(wait);
                    continue;
                }
                Ok(resp) if resp.is_range_ok() => {
                    if resp.body.is_empty() {
                        // "Nothing left" was handled by EOF clamping; an
                        // empty body here is the server breaking contract.
                        self.metrics.record_failed_request();
                        return Err(Error::EmptyRange { start, end });
                    }
                    self.metrics
                        .record_request(resp.body.len() as u64, start, fetch_size);
                    let region_start = if resp.status == 200 { 0 } else { start };
                    self.buffer = Some(CacheRegion {
                        start: region_start,
                        data: resp.body,
                    });
                    return Ok(());
                }
                Ok(resp) => format!("HTTP {}", resp.status),
                Err(message) => message,
            };

            self.metrics.record_failed_request();
            attempts += 1;
            if attempts >= self.config.max_retries {
                return Err(Error::Transport {
                    attempts,
                    message: failure,
                });
            }

            let wait = self.config.backoff_step * attempts;
            self.metrics.record_retry(wait);
            std::thread::sleep(wait);
        }
    }
}

/// Duration of `units` rate-limit units, saturating rather than
/// truncating when a hostile `Retry-After` header exceeds the
/// multiplier range.
fn rate_limit_wait(config: &StreamConfig, units: u64) -> Duration {
    config.retry_after_unit * u32::try_from(units).unwrap_or(u32::MAX)
}

/// How many bytes to fetch for a read of `want` bytes with `remaining`
/// bytes to EOF. Small reads are rounded up to the floor, large reads get
/// the big window; either way the span covers the request and never runs
/// past EOF.
fn fetch_span(want: u64, remaining: u64, config: &StreamConfig) -> u64 {
    let span = if want <= config.large_request_threshold {
        want.max(config.min_fetch_size)
    } else {
        want.max(config.max_fetch_size)
    };
    span.min(remaining)
}

impl Read for RangeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.read_impl(buf).map_err(std::io::Error::other)
    }
}

impl Seek for RangeStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let mut inner = self.inner.lock().unwrap();

        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => inner.size as i128 + offset as i128,
            SeekFrom::Current(offset) => inner.position as i128 + offset as i128,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }

        // Seeking past EOF is allowed; the next read clamps to empty.
        inner.position = new_pos as u64;
        Ok(inner.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::RangeResponse;

    /// Transport serving a fixed byte buffer, honoring ranges.
    struct StaticTransport {
        data: Vec<u8>,
    }

    impl Transport for StaticTransport {
        fn get_range(&self, start: u64, end: u64) -> std::result::Result<RangeResponse, String> {
            let len = self.data.len() as u64;
            let end = end.min(len.saturating_sub(1));
            let body = if start >= len {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(&self.data[start as usize..=end as usize])
            };
            Ok(RangeResponse {
                status: 206,
                total_size: Some(len),
                content_length: Some(body.len() as u64),
                retry_after: None,
                body,
            })
        }
    }

    fn small_config() -> StreamConfig {
        StreamConfig {
            prefetch_size: 16,
            min_fetch_size: 32,
            large_request_threshold: 64,
            max_fetch_size: 128,
            backoff_step: Duration::from_millis(1),
            retry_after_unit: Duration::from_millis(1),
            ..StreamConfig::default()
        }
    }

    fn open_static(data: Vec<u8>) -> RangeStream {
        RangeStream::open_with(Box::new(StaticTransport { data }), small_config()).unwrap()
    }

    #[test]
    fn test_region_containment() {
        let region = CacheRegion {
            start: 100,
            data: Bytes::from_static(b"0123456789"),
        };
        assert!(region.contains(100, 10));
        assert!(region.contains(105, 5));
        assert!(!region.contains(105, 6));
        assert!(!region.contains(99, 2));
        assert!(!region.contains(110, 1));

        let empty = CacheRegion {
            start: 0,
            data: Bytes::new(),
        };
        assert!(!empty.contains(0, 0));
    }

    #[test]
    fn test_fetch_span_heuristics() {
        let config = StreamConfig::default();
        // Small reads round up to the floor.
        assert_eq!(fetch_span(10, u64::MAX, &config), config.min_fetch_size);
        // Large reads get the big window.
        assert_eq!(
            fetch_span(config.large_request_threshold + 1, u64::MAX, &config),
            config.max_fetch_size
        );
        // A read larger than the window is still fully covered.
        assert_eq!(
            fetch_span(config.max_fetch_size + 5, u64::MAX, &config),
            config.max_fetch_size + 5
        );
        // Never past EOF.
        assert_eq!(fetch_span(10, 7, &config), 7);
    }

    #[test]
    fn test_rate_limit_wait_saturates_on_oversized_header() {
        let config = StreamConfig {
            retry_after_unit: Duration::from_millis(1),
            ..StreamConfig::default()
        };
        assert_eq!(rate_limit_wait(&config, 2), Duration::from_millis(2));
        assert_eq!(
            rate_limit_wait(&config, u64::MAX),
            Duration::from_millis(u64::from(u32::MAX))
        );
    }

    #[test]
    fn test_size_discovery_and_seek_arithmetic() {
        let mut stream = open_static((0..=99).collect());
        assert_eq!(stream.len(), 100);

        assert_eq!(stream.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(stream.seek(SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(stream.seek(SeekFrom::Current(-15)).unwrap(), 0);
        assert_eq!(stream.seek(SeekFrom::End(-1)).unwrap(), 99);
        // Past EOF is fine until the next read.
        assert_eq!(stream.seek(SeekFrom::End(10)).unwrap(), 110);

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        assert!(stream.seek(SeekFrom::Current(-200)).is_err());
    }

    #[test]
    fn test_read_matches_reference_slice() {
        let data: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut stream = open_static(data.clone());

        for (offset, len) in [(0u64, 8usize), (5, 16), (90, 40), (150, 50), (199, 1)] {
            stream.seek(SeekFrom::Start(offset)).unwrap();
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, &data[offset as usize..offset as usize + len]);
        }
    }

    #[test]
    fn test_read_clamps_at_eof() {
        let mut stream = open_static(vec![1u8; 50]);
        stream.seek(SeekFrom::Start(45)).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_unknown_size_degrades_to_empty() {
        struct NoSize;
        impl Transport for NoSize {
            fn get_range(&self, _: u64, _: u64) -> std::result::Result<RangeResponse, String> {
                Ok(RangeResponse {
                    status: 206,
                    total_size: None,
                    content_length: None,
                    retry_after: None,
                    body: Bytes::from_static(b"x"),
                })
            }
        }

        let mut stream =
            RangeStream::open_with(Box::new(NoSize), StreamConfig::default()).unwrap();
        assert_eq!(stream.len(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_probe_rejects_bad_status() {
        struct NotFound;
        impl Transport for NotFound {
            fn get_range(&self, _: u64, _: u64) -> std::result::Result<RangeResponse, String> {
                Ok(RangeResponse {
                    status: 404,
                    total_size: None,
                    content_length: None,
                    retry_after: None,
                    body: Bytes::new(),
                })
            }
        }

        match RangeStream::open_with(Box::new(NotFound), StreamConfig::default()) {
            Err(Error::Connect { status: 404 }) => {}
            Err(other) => panic!("expected Connect error, got {other:?}"),
            Ok(_) => panic!("expected Connect error, got a stream"),
        }
    }
}
