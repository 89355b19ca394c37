//! transport — length-prefixed frame exchange over TCP
//!
//! Every message in both directions is a 4-byte big-endian length followed by
//! that many bytes of encoded image. The server answers each request with
//! exactly one response before reading the next, and serves one connection
//! at a time.
//!
//! Per-frame failures never end a session: an undecodable request is echoed
//! back unchanged, and a pipeline failure returns the decoded frame
//! re-encoded without overlays.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ServerSettings, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::error::{FilterError, Result};
use crate::pipeline::{FilterContext, FilterPipeline, FrameOutcome};
use crate::video::{decode_jpeg, encode_jpeg, RgbFrame};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;
/// Pause after a failed `accept()` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

// ── Framing ──────────────────────────────────────────────────────────────────

/// Write one length-prefixed message and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FilterError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed message.
///
/// Returns `Ok(None)` when the peer closes the stream, whether before the
/// prefix or part-way through the payload; a partial payload is discarded.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    if !fill(reader, &mut prefix)? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(FilterError::PayloadTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        debug!(expected = len, "peer closed mid-payload");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Fill `buf` completely. `false` if the stream ended first.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

// ── Request handling ─────────────────────────────────────────────────────────

/// What a response payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The filtered frame.
    Filtered,
    /// The decoded request frame, re-encoded without overlays.
    Unfiltered,
    /// The request bytes, unchanged.
    Echoed,
}

/// Decode → filter → encode one request payload. Always yields a response.
pub fn process_payload(
    pipeline: &mut FilterPipeline<'_>,
    payload: &[u8],
    jpeg_quality: u8,
) -> (Vec<u8>, ResponseKind) {
    let frame = match decode_jpeg(payload) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(len = payload.len(), "echoing undecodable request: {e}");
            return (payload.to_vec(), ResponseKind::Echoed);
        }
    };

    let original = frame.clone();
    let (frame, kind) = match pipeline.process(frame) {
        FrameOutcome::Filtered(frame) => (frame, ResponseKind::Filtered),
        FrameOutcome::Fallback { frame, .. } => (frame, ResponseKind::Unfiltered),
    };

    match encode_jpeg(&frame, jpeg_quality) {
        Ok(bytes) => return (bytes, kind),
        Err(e) => warn!("re-encoding unfiltered frame after encode failure: {e}"),
    }

    match encode_jpeg(&original, jpeg_quality) {
        Ok(bytes) => (bytes, ResponseKind::Unfiltered),
        Err(e) => {
            warn!("echoing request after encode failure: {e}");
            (payload.to_vec(), ResponseKind::Echoed)
        }
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

/// Counters for one served connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub filtered: u64,
    pub unfiltered: u64,
    pub echoed: u64,
}

/// Sequential single-connection frame server.
pub struct FrameServer<'a> {
    listener: TcpListener,
    context: &'a FilterContext,
    settings: ServerSettings,
}

impl<'a> FrameServer<'a> {
    /// Bind `settings.listen_addr`.
    pub fn bind(context: &'a FilterContext, settings: ServerSettings) -> Result<Self> {
        settings.validate()?;
        let listener = TcpListener::bind(&settings.listen_addr)?;
        Ok(Self::from_listener(listener, context, settings))
    }

    pub fn from_listener(
        listener: TcpListener,
        context: &'a FilterContext,
        settings: ServerSettings,
    ) -> Self {
        Self {
            listener,
            context,
            settings,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections one after another. With `once` set, return after the
    /// first session ends. A failed `accept()` is logged and retried.
    pub fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, once = self.settings.once, "frame server listening");
        loop {
            if let Err(e) = self.serve_next() {
                warn!("accept failed, retrying: {e}");
                std::thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
            if self.settings.once {
                info!("single session finished, shutting down");
                return Ok(());
            }
        }
    }

    /// Accept one connection and serve it to completion. Only an `accept()`
    /// failure is returned; session I/O errors are logged and end only that
    /// session.
    pub fn serve_next(&self) -> Result<SessionSummary> {
        let (stream, peer) = self.listener.accept()?;
        info!(%peer, "client connected");

        let mut summary = SessionSummary::default();
        let result = self.serve_connection(stream, &mut summary);
        match result {
            Ok(()) => info!(
                %peer,
                frames = summary.frames,
                filtered = summary.filtered,
                unfiltered = summary.unfiltered,
                echoed = summary.echoed,
                "client disconnected"
            ),
            Err(e) => warn!(
                %peer,
                frames = summary.frames,
                filtered = summary.filtered,
                unfiltered = summary.unfiltered,
                echoed = summary.echoed,
                "session ended with error: {e}"
            ),
        }
        Ok(summary)
    }

    fn serve_connection(&self, stream: TcpStream, summary: &mut SessionSummary) -> Result<()> {
        // accepted sockets may inherit a non-blocking listener's mode
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.settings.read_timeout())?;
        stream.set_write_timeout(self.settings.write_timeout())?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);
        let mut pipeline = FilterPipeline::new(self.context);

        while let Some(request) = read_frame(&mut reader, self.settings.max_payload_bytes)? {
            let (response, kind) =
                process_payload(&mut pipeline, &request, self.settings.jpeg_quality);
            write_frame(&mut writer, &response)?;

            summary.frames += 1;
            match kind {
                ResponseKind::Filtered => summary.filtered += 1,
                ResponseKind::Unfiltered => summary.unfiltered += 1,
                ResponseKind::Echoed => summary.echoed += 1,
            }
            debug!(
                request_len = request.len(),
                response_len = response.len(),
                ?kind,
                "frame served"
            );
        }

        Ok(())
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Caller side of the exchange: send a frame, wait for its response.
pub struct FrameClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    max_payload_bytes: usize,
}

impl FrameClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        })
    }

    /// Send one encoded payload and return the server's response payload.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        write_frame(&mut self.writer, payload)?;
        read_frame(&mut self.reader, self.max_payload_bytes)?.ok_or_else(|| {
            FilterError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection before responding",
            ))
        })
    }

    /// Encode `frame`, exchange it and decode the response.
    pub fn exchange_frame(&mut self, frame: &RgbFrame, jpeg_quality: u8) -> Result<RgbFrame> {
        let payload = encode_jpeg(frame, jpeg_quality)?;
        let response = self.exchange(&payload)?;
        decode_jpeg(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn prefix_is_big_endian_length() {
        let out = framed(&[0xAA; 258]);
        assert_eq!(&out[..4], &[0, 0, 1, 2]);
        assert_eq!(out.len(), 4 + 258);
    }

    #[test]
    fn round_trip_edge_sizes() {
        for size in [0usize, 1, 65536] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut reader = Cursor::new(framed(&payload));
            let got = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD_BYTES)
                .unwrap()
                .unwrap();
            assert_eq!(got.len(), size);
            assert_eq!(got, payload);
        }
    }

    #[test]
    fn reassembles_from_short_reads() {
        let payload: Vec<u8> = (0..65536).map(|i| (i * 31 % 256) as u8).collect();
        let mut bytes = framed(&payload);
        bytes.extend(framed(b"second"));
        let mut reader = Trickle {
            inner: Cursor::new(bytes),
            chunk: 7,
        };

        let first = read_frame(&mut reader, usize::MAX).unwrap().unwrap();
        assert_eq!(first, payload);
        let second = read_frame(&mut reader, usize::MAX).unwrap().unwrap();
        assert_eq!(second, b"second");
        assert!(read_frame(&mut reader, usize::MAX).unwrap().is_none());
    }

    #[test]
    fn closed_stream_ends_cleanly() {
        let mut empty = Cursor::new(Vec::new());
        assert!(read_frame(&mut empty, 1024).unwrap().is_none());

        // partial prefix
        let mut partial = Cursor::new(vec![0, 0]);
        assert!(read_frame(&mut partial, 1024).unwrap().is_none());
    }

    #[test]
    fn truncated_payload_is_discarded() {
        let mut bytes = framed(&[1u8; 100]);
        bytes.truncate(4 + 60);
        let mut reader = Cursor::new(bytes);
        assert!(read_frame(&mut reader, 1024).unwrap().is_none());
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let mut reader = Cursor::new(framed(&[0u8; 2048]));
        assert!(matches!(
            read_frame(&mut reader, 1024),
            Err(FilterError::PayloadTooLarge { len: 2048, max: 1024 })
        ));
    }
}
