//! De-framing of engine log streams
//!
//! Without a TTY the engine multiplexes stdout and stderr into one byte stream:
//!
//! ```text
//! [stream u8][0 0 0][payload length u32 BE][payload ...]
//! ```
//!
//! Chunks from the transport do not respect frame boundaries, so partial
//! headers and payloads are buffered until the rest arrives.

use bytes::{Buf, Bytes, BytesMut};

const HEADER_LEN: usize = 8;

/// Which stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            // 3 is the engine's own error stream on attach; treat it as stderr
            2 | 3 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// One de-framed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub stream: StreamKind,
    pub payload: Bytes,
}

/// How the engine delivers log bytes for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// 8-byte headers (containers without a TTY)
    Multiplexed,
    /// Unframed stdout (TTY containers)
    Raw,
}

impl FrameMode {
    pub fn for_tty(tty: bool) -> Self {
        if tty {
            FrameMode::Raw
        } else {
            FrameMode::Multiplexed
        }
    }
}

/// Incremental de-framer
#[derive(Debug)]
pub struct LogDemuxer {
    mode: FrameMode,
    buffer: BytesMut,
}

impl LogDemuxer {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one transport chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogFrame> {
        if self.mode == FrameMode::Raw {
            if chunk.is_empty() {
                return Vec::new();
            }
            return vec![LogFrame {
                stream: StreamKind::Stdout,
                payload: Bytes::copy_from_slice(chunk),
            }];
        }

        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while self.buffer.len() >= HEADER_LEN {
            let header = &self.buffer[..HEADER_LEN];
            let stream = match StreamKind::from_byte(header[0]) {
                Some(kind) if header[1..4] == [0, 0, 0] => kind,
                _ => {
                    // Not a multiplex header: the container has a TTY after all
                    tracing::debug!("Log stream is not multiplexed, passing bytes through");
                    self.mode = FrameMode::Raw;
                    let rest = self.buffer.split().freeze();
                    frames.push(LogFrame {
                        stream: StreamKind::Stdout,
                        payload: rest,
                    });
                    return frames;
                }
            };

            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.buffer.len() < HEADER_LEN + len {
                break;
            }

            self.buffer.advance(HEADER_LEN);
            let payload = self.buffer.split_to(len).freeze();
            frames.push(LogFrame { stream, payload });
        }

        frames
    }

    /// Flush at end of stream
    ///
    /// A truncated final frame yields whatever payload arrived; a lone partial
    /// header carries no payload and is dropped.
    pub fn finish(&mut self) -> Option<LogFrame> {
        let looks_framed = self
            .buffer
            .iter()
            .enumerate()
            .take(4)
            .all(|(i, &b)| if i == 0 { b <= 3 } else { b == 0 });
        if !self.buffer.is_empty() && !looks_framed {
            // Short unframed output never filled a header
            return Some(LogFrame {
                stream: StreamKind::Stdout,
                payload: self.buffer.split().freeze(),
            });
        }

        if self.buffer.len() <= HEADER_LEN {
            if !self.buffer.is_empty() {
                tracing::debug!("Dropping {} bytes of partial log header", self.buffer.len());
            }
            self.buffer.clear();
            return None;
        }

        let stream = StreamKind::from_byte(self.buffer[0]).unwrap_or(StreamKind::Stdout);
        self.buffer.advance(HEADER_LEN);
        Some(LogFrame {
            stream,
            payload: self.buffer.split().freeze(),
        })
    }
}

/// A complete line of log output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Splits frames into lines, keeping a partial line per stream
#[derive(Debug, Default)]
pub struct LineSplitter {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: &LogFrame) -> Vec<LogLine> {
        let buffer = match frame.stream {
            StreamKind::Stderr => &mut self.stderr,
            _ => &mut self.stdout,
        };
        buffer.extend_from_slice(&frame.payload);

        let mut lines = Vec::new();
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=pos).collect();
            lines.push(LogLine {
                stream: frame.stream,
                text: to_line(&raw[..raw.len() - 1]),
            });
        }
        lines
    }

    /// Emit any unterminated lines
    pub fn finish(&mut self) -> Vec<LogLine> {
        let mut lines = Vec::new();
        for (stream, buffer) in [
            (StreamKind::Stdout, &mut self.stdout),
            (StreamKind::Stderr, &mut self.stderr),
        ] {
            if !buffer.is_empty() {
                lines.push(LogLine {
                    stream,
                    text: to_line(buffer),
                });
                buffer.clear();
            }
        }
        lines
    }
}

fn to_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
