//! Readiness monitoring for a starting container
//!
//! The container's startup script prints a marker line once every service is
//! up. [`wait_for_ready`] follows the log stream until it sees the marker, an
//! error pattern, or the deadline, whichever comes first.

mod demux;

pub use demux::*;

use bytes::Bytes;
use devbox_config::ReadinessConfig;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// What to look for while a container starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSpec {
    pub marker: String,
    /// Checked in order; the first substring that matches wins
    pub error_patterns: Vec<String>,
    pub timeout: Duration,
    /// How many recent lines a failure carries
    pub tail_lines: usize,
}

impl ReadinessSpec {
    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self {
            marker: config.marker.clone(),
            error_patterns: config.error_patterns.clone(),
            timeout: config.timeout(),
            tail_lines: config.tail_lines,
        }
    }
}

/// Why a container never became ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A line matched one of the error patterns
    ErrorLine(String),
    Timeout(Duration),
    /// The log stream ended before the marker (the container stopped)
    StreamClosed,
    /// The log connection failed
    Stream(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ErrorLine(line) => write!(f, "error in container output: {}", line),
            FailureReason::Timeout(d) => {
                write!(f, "no readiness marker within {}s", d.as_secs())
            }
            FailureReason::StreamClosed => {
                write!(f, "container stopped logging before it became ready")
            }
            FailureReason::Stream(e) => write!(f, "log stream failed: {}", e),
        }
    }
}

/// Outcome of one readiness wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessSignal {
    Ready,
    Failed {
        reason: FailureReason,
        /// Most recent lines, oldest first
        tail: Vec<String>,
    },
}

impl ReadinessSignal {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessSignal::Ready)
    }
}

/// Line-by-line decision state
struct Watcher<'a> {
    spec: &'a ReadinessSpec,
    tail: VecDeque<String>,
}

impl<'a> Watcher<'a> {
    fn new(spec: &'a ReadinessSpec) -> Self {
        Self {
            spec,
            tail: VecDeque::with_capacity(spec.tail_lines),
        }
    }

    fn observe(&mut self, line: LogLine) -> Option<ReadinessSignal> {
        tracing::trace!("container: {}", line.text);

        let error = self
            .spec
            .error_patterns
            .iter()
            .any(|p| !p.is_empty() && line.text.contains(p.as_str()));
        let ready = !error && line.text.contains(self.spec.marker.as_str());

        self.remember(line.text.clone());

        if error {
            return Some(self.fail(FailureReason::ErrorLine(line.text)));
        }
        if ready {
            return Some(ReadinessSignal::Ready);
        }
        None
    }

    fn remember(&mut self, text: String) {
        if self.spec.tail_lines == 0 {
            return;
        }
        if self.tail.len() == self.spec.tail_lines {
            self.tail.pop_front();
        }
        self.tail.push_back(text);
    }

    fn fail(&mut self, reason: FailureReason) -> ReadinessSignal {
        ReadinessSignal::Failed {
            reason,
            tail: std::mem::take(&mut self.tail).into_iter().collect(),
        }
    }
}

/// Follow `stream` until the marker, an error line, or the deadline
///
/// The stream is owned and dropped on return, which closes the connection.
pub async fn wait_for_ready<S>(stream: S, mode: FrameMode, spec: &ReadinessSpec) -> ReadinessSignal
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut stream = stream;
    let mut demux = LogDemuxer::new(mode);
    let mut splitter = LineSplitter::new();
    let mut watcher = Watcher::new(spec);

    let deadline = tokio::time::sleep(spec.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::debug!("Readiness deadline of {:?} elapsed", spec.timeout);
                return watcher.fail(FailureReason::Timeout(spec.timeout));
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for frame in demux.push(&bytes) {
                        for line in splitter.push(&frame) {
                            if let Some(signal) = watcher.observe(line) {
                                return signal;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    return watcher.fail(FailureReason::Stream(e.to_string()));
                }
                None => {
                    let mut lines = Vec::new();
                    if let Some(frame) = demux.finish() {
                        lines.extend(splitter.push(&frame));
                    }
                    lines.extend(splitter.finish());
                    for line in lines {
                        if let Some(signal) = watcher.observe(line) {
                            return signal;
                        }
                    }
                    return watcher.fail(FailureReason::StreamClosed);
                }
            }
        }
    }
}

/// Forward a log stream to `sink` frame by frame, de-framing as needed
///
/// Returns once the stream ends; callers race it against Ctrl-C for follows.
pub async fn forward_logs<S, F>(stream: S, mode: FrameMode, mut sink: F) -> std::io::Result<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    F: FnMut(StreamKind, &[u8]) -> std::io::Result<()>,
{
    let mut stream = stream;
    let mut demux = LogDemuxer::new(mode);

    while let Some(chunk) = stream.next().await {
        for frame in demux.push(&chunk?) {
            sink(frame.stream, &frame.payload)?;
        }
    }
    if let Some(frame) = demux.finish() {
        sink(frame.stream, &frame.payload)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::encode_frame;
    use futures::stream;

    fn spec(timeout: Duration) -> ReadinessSpec {
        ReadinessSpec::from_config(&ReadinessConfig {
            timeout_secs: timeout.as_secs().max(1),
            ..Default::default()
        })
        .with_timeout(timeout)
    }

    impl ReadinessSpec {
        fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }
    }

    fn framed(lines: &[(u8, &str)]) -> Vec<u8> {
        lines
            .iter()
            .flat_map(|(kind, text)| encode_frame(*kind, format!("{}\n", text).as_bytes()))
            .collect()
    }

    fn chunks(data: Vec<u8>, size: usize) -> Vec<std::io::Result<Bytes>> {
        data.chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    #[tokio::test]
    async fn test_marker_means_ready() {
        let data = framed(&[(1, "booting"), (2, "generating host keys"), (1, "--READY--")]);
        let signal = wait_for_ready(
            stream::iter(chunks(data, 5)),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(signal, ReadinessSignal::Ready);
    }

    #[tokio::test]
    async fn test_harmless_entrypoint_noise_is_not_fatal() {
        let data = framed(&[
            (2, "chown: /home/developer/.cache: Permission denied"),
            (2, "ERROR: optional mount /workspace/.cache missing"),
            (1, "--READY--"),
        ]);
        let signal = wait_for_ready(
            stream::iter(chunks(data, 7)),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(signal, ReadinessSignal::Ready);
    }

    #[tokio::test]
    async fn test_error_before_marker_fails() {
        let data = framed(&[
            (1, "booting"),
            (2, "sshd: no hostkeys available -- exiting."),
            (1, "--READY--"),
        ]);
        let signal = wait_for_ready(
            stream::iter(chunks(data, 3)),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(5)),
        )
        .await;

        match signal {
            ReadinessSignal::Failed { reason, tail } => {
                assert_eq!(
                    reason,
                    FailureReason::ErrorLine("sshd: no hostkeys available -- exiting.".to_string())
                );
                assert_eq!(tail.last().map(String::as_str), Some("sshd: no hostkeys available -- exiting."));
                assert!(!tail.iter().any(|l| l == "--READY--"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_bounded_tail() {
        let lines: Vec<(u8, String)> = (0..120).map(|i| (1u8, format!("line {}", i))).collect();
        let refs: Vec<(u8, &str)> = lines.iter().map(|(k, t)| (*k, t.as_str())).collect();
        let data = framed(&refs);

        // Deliver the lines, then stay open without ever sending the marker
        let stream = stream::iter(chunks(data, 64)).chain(stream::pending());
        let signal = wait_for_ready(
            Box::pin(stream),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(90)),
        )
        .await;

        match signal {
            ReadinessSignal::Failed { reason, tail } => {
                assert_eq!(reason, FailureReason::Timeout(Duration::from_secs(90)));
                assert_eq!(tail.len(), 50);
                assert_eq!(tail.first().map(String::as_str), Some("line 70"));
                assert_eq!(tail.last().map(String::as_str), Some("line 119"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_stream_without_marker() {
        let data = framed(&[(1, "starting"), (1, "exiting")]);
        let signal = wait_for_ready(
            stream::iter(chunks(data, 100)),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(
            signal,
            ReadinessSignal::Failed {
                reason: FailureReason::StreamClosed,
                tail: vec!["starting".to_string(), "exiting".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_unterminated_marker_at_end_counts() {
        let signal = wait_for_ready(
            stream::iter(vec![Ok(Bytes::from_static(b"setup done\n--READY--"))]),
            FrameMode::Raw,
            &spec(Duration::from_secs(5)),
        )
        .await;
        assert!(signal.is_ready());
    }

    #[tokio::test]
    async fn test_transport_error_fails() {
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from(encode_frame(1, b"booting\n"))),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset")),
        ];
        let signal = wait_for_ready(
            stream::iter(items),
            FrameMode::Multiplexed,
            &spec(Duration::from_secs(5)),
        )
        .await;
        assert!(matches!(
            signal,
            ReadinessSignal::Failed {
                reason: FailureReason::Stream(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_forward_logs_routes_streams() {
        let data = framed(&[(1, "out"), (2, "err")]);
        let mut seen = Vec::new();
        forward_logs(stream::iter(chunks(data, 7)), FrameMode::Multiplexed, |kind, bytes| {
            seen.push((kind, String::from_utf8_lossy(bytes).into_owned()));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(
            seen,
            vec![
                (StreamKind::Stdout, "out\n".to_string()),
                (StreamKind::Stderr, "err\n".to_string()),
            ]
        );
    }
}
