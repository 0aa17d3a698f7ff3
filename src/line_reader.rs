//! Chunked, line-boundary-safe file reading.
//!
//! A [`LineReader`] streams a file in fixed-size byte chunks and hands back
//! decoded text segments that always end on a line terminator (except for a
//! final unterminated line). Segments keep their original terminators, so
//! concatenating every segment reproduces the decoded file exactly.
//!
//! ```text
//! chunk 1: "one\ntw"   -> emits "one\n",   remainder "tw"
//! chunk 2: "o\nthree"  -> emits "two\n",   remainder "three"
//! eof                  -> emits "three"
//! ```

use crate::errors::{Error, Result};
use encoding_rs::{Decoder, Encoding, UTF_8};
use futures::stream::{self, Stream};
use std::io::{self, Read, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default number of bytes read per chunk.
pub const CHUNK_SIZE: usize = 10240;

/// Number of leading bytes inspected by the binary heuristic.
pub const HEADER_SIZE: usize = 256;

/// Classifies a file header as binary.
///
/// A NUL byte is conclusive. Otherwise the header counts as binary when more
/// than 10% of it is control bytes that do not show up in ordinary text.
pub fn looks_binary(header: &[u8]) -> bool {
    if header.is_empty() || header.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return false;
    }
    if header.contains(&0) {
        return true;
    }

    let suspicious = header
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x08 | 0x0C | 0x1B))
        .count();
    suspicious * 10 > header.len()
}

/// Reads a single file as a sequence of line-terminated text segments.
#[derive(Debug, Clone)]
pub struct LineReader {
    path: PathBuf,
    encoding: &'static Encoding,
    chunk_size: usize,
}

impl LineReader {
    /// Creates a reader for `path` that decodes UTF-8 in `CHUNK_SIZE` chunks.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: UTF_8,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Sets the source encoding.
    ///
    /// Only ASCII-compatible encodings are accepted, since segments are split
    /// on raw `\n` and `\r` bytes before decoding.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Result<Self> {
        if !encoding.is_ascii_compatible() {
            return Err(Error::UnsupportedEncoding(encoding.name().to_string()));
        }
        self.encoding = encoding;
        Ok(self)
    }

    /// Sets the chunk size in bytes. Values below 1 are clamped to 1.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Reads the file header and reports whether it looks binary.
    ///
    /// The probe handle is closed before returning.
    pub fn probe_binary(&self) -> Result<bool> {
        let mut file = std::fs::File::open(&self.path).map_err(|e| Error::open(&self.path, e))?;
        let mut header = [0u8; HEADER_SIZE];
        let n = fill_sync(&mut file, &mut header).map_err(|e| Error::read(&self.path, e))?;
        Ok(looks_binary(&header[..n]))
    }

    /// Opens the file and prepares a read session.
    ///
    /// The header is probed again here since the file may have changed since
    /// `probe_binary`. A binary file yields a session that is already
    /// finished: it emits nothing and reports no error.
    pub async fn start_session(&self, cancel: &CancellationToken) -> Result<ReadSession> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| Error::open(&self.path, e))?;

        let mut session = ReadSession {
            path: self.path.clone(),
            file: None,
            chunk: vec![0u8; self.chunk_size],
            header: [0u8; HEADER_SIZE],
            decoder: self.encoding.new_decoder_without_bom_handling(),
            encoding: self.encoding,
            remainder: String::new(),
            offset: 0,
            malformed: false,
            binary: false,
        };

        let n = fill(&mut file, &mut session.header)
            .await
            .map_err(|e| Error::read(&self.path, e))?;
        if looks_binary(&session.header[..n]) {
            trace!(path = %self.path.display(), "binary header, skipping");
            session.binary = true;
            return Ok(session);
        }

        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| Error::read(&self.path, e))?;
        session.file = Some(file);
        Ok(session)
    }

    /// Consumes the reader and returns its segments as a stream.
    ///
    /// An open or read failure is yielded once, after which the stream ends.
    pub fn into_segments(self, cancel: CancellationToken) -> impl Stream<Item = Result<String>> {
        enum State {
            Unopened(LineReader),
            Open(ReadSession),
        }

        stream::try_unfold(State::Unopened(self), move |state| {
            let cancel = cancel.clone();
            async move {
                let mut session = match state {
                    State::Unopened(reader) => reader.start_session(&cancel).await?,
                    State::Open(session) => session,
                };
                let segment = session.next_segment(&cancel).await?;
                Ok::<_, Error>(segment.map(|s| (s, State::Open(session))))
            }
        })
    }
}

/// State for one pass over one file.
///
/// The buffers and decoder belong to this session alone. The file handle is
/// dropped as soon as the session reaches end of file, fails, or detects a
/// binary header.
pub struct ReadSession {
    path: PathBuf,
    file: Option<File>,
    chunk: Vec<u8>,
    header: [u8; HEADER_SIZE],
    decoder: Decoder,
    encoding: &'static Encoding,
    remainder: String,
    offset: u64,
    malformed: bool,
    binary: bool,
}

impl ReadSession {
    /// Returns the next segment, or `None` once the file is exhausted.
    ///
    /// Every returned segment except possibly the last ends with a line
    /// terminator. A read error closes the session; later calls return `None`.
    pub async fn next_segment(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        loop {
            let Some(file) = self.file.as_mut() else {
                return Ok(None);
            };
            if cancel.is_cancelled() {
                self.file = None;
                return Err(Error::Cancelled);
            }

            let read = match fill(file, &mut self.chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.file = None;
                    return Err(Error::read(&self.path, e));
                }
            };

            if read == 0 {
                self.file = None;
                decode_append(&mut self.decoder, &[], true, &mut self.remainder, &mut self.malformed);
                trace!(path = %self.path.display(), bytes = self.offset, "end of file");
                if self.remainder.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.remainder)));
            }

            trace!(path = %self.path.display(), offset = self.offset, read, "chunk");
            self.offset += read as u64;
            let bytes = &self.chunk[..read];

            match last_terminator(bytes) {
                None => {
                    decode_append(&mut self.decoder, bytes, false, &mut self.remainder, &mut self.malformed);
                }
                Some(end) => {
                    let mut segment = std::mem::take(&mut self.remainder);
                    decode_append(&mut self.decoder, &bytes[..=end], false, &mut segment, &mut self.malformed);
                    decode_append(&mut self.decoder, &bytes[end + 1..], false, &mut self.remainder, &mut self.malformed);
                    return Ok(Some(segment));
                }
            }
        }
    }

    /// `true` when the header was classified as binary.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// `true` when the decoder had to substitute U+FFFD for malformed input.
    pub fn had_malformed(&self) -> bool {
        self.malformed
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Index of the last line terminator in `bytes`.
///
/// `\r` only counts when the byte after it is already in hand. A trailing
/// `\r` may be the first half of `\r\n`, so it waits for the next chunk.
fn last_terminator(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len())
        .rev()
        .find(|&i| bytes[i] == b'\n' || (bytes[i] == b'\r' && i + 1 < bytes.len()))
}

fn decode_append(decoder: &mut Decoder, bytes: &[u8], last: bool, dst: &mut String, malformed: &mut bool) {
    let needed = decoder
        .max_utf8_buffer_length(bytes.len())
        .unwrap_or(bytes.len().saturating_mul(3) + 4);
    dst.reserve(needed);
    let (_, _, replaced) = decoder.decode_to_string(bytes, dst, last);
    *malformed |= replaced;
}

async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn fill_sync<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::fs;
    use tempfile::TempDir;

    const QUICKSORT: &[&str] = &[
        "var quicksort = function () {",
        "  var sort = function(items) {  # followed by a pretty long comment which is used to check the maxLineLength feature",
        "    if (items.length <= 1) return items;",
        "    var pivot = items.shift(), current, left = [], right = [];",
        "    while(items.length > 0) {",
        "      current = items.shift();",
        "      current < pivot ? left.push(current) : right.push(current);",
        "    }",
        "    return sort(left).concat(pivot).concat(sort(right));",
        "  };",
        "",
        "  return sort(Array.apply(this, arguments));",
        "};",
    ];

    async fn read_all(path: &Path, chunk_size: usize) -> Result<Vec<String>> {
        let reader = LineReader::new(path).with_chunk_size(chunk_size);
        let cancel = CancellationToken::new();
        let mut session = reader.start_session(&cancel).await?;
        let mut segments = Vec::new();
        while let Some(segment) = session.next_segment(&cancel).await? {
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Splits segments back into lines the way a consumer would.
    fn lines_of(segments: &[String], separator: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for segment in segments {
            let trimmed = segment
                .strip_suffix('\n')
                .map(|s| s.strip_suffix('\r').unwrap_or(s))
                .unwrap_or(segment);
            lines.extend(trimmed.split(separator).map(str::to_string));
        }
        lines
    }

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_no_newline_at_end() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "sample.js", QUICKSORT.join("\n").as_bytes());

        let segments = read_all(&path, 10).await.unwrap();
        assert_eq!(lines_of(&segments, "\n"), QUICKSORT);
    }

    #[tokio::test]
    async fn test_newline_at_end() {
        let dir = TempDir::new().unwrap();
        let content = format!("{}\n", QUICKSORT.join("\n"));
        let path = write(&dir, "sample-end-newline.js", content.as_bytes());

        let segments = read_all(&path, 10).await.unwrap();
        assert!(segments.last().unwrap().ends_with("};\n"));
        assert_eq!(lines_of(&segments, "\n"), QUICKSORT);
    }

    #[tokio::test]
    async fn test_windows_line_endings() {
        let dir = TempDir::new().unwrap();
        let content = format!("{}\r\n", QUICKSORT.join("\r\n"));
        let path = write(&dir, "sample-with-windows-line-endings.js", content.as_bytes());

        let segments = read_all(&path, 10).await.unwrap();
        assert_eq!(lines_of(&segments, "\r\n"), QUICKSORT);
        assert_eq!(segments.concat(), content);
    }

    #[tokio::test]
    async fn test_reconstructs_file_for_every_chunk_size() {
        let dir = TempDir::new().unwrap();
        let content = "alpha\nbeta\r\ngamma\rdelta\n\n\r\nlast line without terminator";
        let path = write(&dir, "mixed.txt", content.as_bytes());

        for chunk_size in 1..=24 {
            let segments = read_all(&path, chunk_size).await.unwrap();
            assert_eq!(segments.concat(), content, "chunk size {chunk_size}");
            for segment in &segments[..segments.len() - 1] {
                assert!(
                    segment.ends_with('\n') || segment.ends_with('\r'),
                    "chunk size {chunk_size}: {segment:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_crlf_split_across_chunks_stays_together() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "crlf.txt", b"ab\r\ncd\r\n");

        let segments = read_all(&path, 3).await.unwrap();
        assert_eq!(segments, vec!["ab\r\n", "cd\r\n"]);
    }

    #[tokio::test]
    async fn test_cr_only_file_is_split_on_cr() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "cr.txt", b"one\rtwo\rthree");

        let segments = read_all(&path, 5).await.unwrap();
        assert_eq!(segments.concat(), "one\rtwo\rthree");
        assert!(segments.len() > 1);
        assert_eq!(lines_of(&segments, "\r").concat(), "onetwothree");
    }

    #[tokio::test]
    async fn test_multibyte_characters_at_every_boundary() {
        let dir = TempDir::new().unwrap();
        let content = "héllo wörld ✓\n日本語のテキスト\n🎉 emoji 🎉\nÅngström";
        let path = write(&dir, "file7_multibyte.txt", content.as_bytes());

        for chunk_size in 1..=20 {
            let segments = read_all(&path, chunk_size).await.unwrap();
            assert!(segments.iter().all(|s| !s.contains('\u{FFFD}')), "chunk size {chunk_size}");
            assert_eq!(segments.concat(), content, "chunk size {chunk_size}");
        }
    }

    #[tokio::test]
    async fn test_binary_file_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "image.bin", &[0x89, b'P', b'N', b'G', 0x00, 0x00, b'\n', 0x1A]);

        let reader = LineReader::new(&path);
        assert!(reader.probe_binary().unwrap());

        let cancel = CancellationToken::new();
        let mut session = reader.start_session(&cancel).await.unwrap();
        assert!(session.is_binary());
        assert!(session.next_segment(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_agrees_with_session_for_text() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "text.txt", b"plain text\n");

        let reader = LineReader::new(&path);
        assert!(!reader.probe_binary().unwrap());
        let session = reader.start_session(&CancellationToken::new()).await.unwrap();
        assert!(!session.is_binary());
    }

    #[tokio::test]
    async fn test_missing_file_yields_one_error() {
        let reader = LineReader::new("/this-does-not-exist.js");
        assert!(reader.probe_binary().unwrap_err().is_not_found());

        let items: Vec<Result<String>> = reader
            .into_segments(CancellationToken::new())
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::Open { .. })));
    }

    #[tokio::test]
    async fn test_stream_yields_segments_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ordered.txt", b"1\n2\n3\n4\n5");

        let segments: Vec<String> = LineReader::new(&path)
            .with_chunk_size(4)
            .into_segments(CancellationToken::new())
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(segments.concat(), "1\n2\n3\n4\n5");
        assert_eq!(segments.last().map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn test_empty_file_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.txt", b"");

        assert!(!LineReader::new(&path).probe_binary().unwrap());
        assert!(read_all(&path, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_encoding_is_decoded() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "latin.txt", b"caf\xE9\nna\xEFve\n");

        let reader = LineReader::new(&path)
            .with_encoding(encoding_rs::WINDOWS_1252)
            .unwrap()
            .with_chunk_size(4);
        let cancel = CancellationToken::new();
        let mut session = reader.start_session(&cancel).await.unwrap();
        let mut text = String::new();
        while let Some(segment) = session.next_segment(&cancel).await.unwrap() {
            text.push_str(&segment);
        }
        assert_eq!(text, "café\nnaïve\n");
        assert!(!session.had_malformed());
    }

    #[tokio::test]
    async fn test_malformed_utf8_is_flagged() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "broken.txt", b"ok\nab\xFFcd\n");

        let reader = LineReader::new(&path);
        let cancel = CancellationToken::new();
        let mut session = reader.start_session(&cancel).await.unwrap();
        while session.next_segment(&cancel).await.unwrap().is_some() {}
        assert!(session.had_malformed());
    }

    #[tokio::test]
    async fn test_cancelled_session_stops() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "text.txt", b"a\nb\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = LineReader::new(&path).start_session(&cancel).await.err().unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_utf16_is_rejected() {
        let err = LineReader::new("x.txt").with_encoding(encoding_rs::UTF_16LE).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_looks_binary() {
        assert!(!looks_binary(b""));
        assert!(!looks_binary(b"fn main() {}\n\tprintln!();\r\n"));
        assert!(!looks_binary("ünïcödé".as_bytes()));
        assert!(!looks_binary(&[0xEF, 0xBB, 0xBF, b'h', b'i']));
        assert!(looks_binary(b"abc\0def"));
        assert!(looks_binary(&[0x01, 0x02, 0x03, b'a', 0x04, 0x05]));
    }

    #[test]
    fn test_last_terminator() {
        assert_eq!(last_terminator(b"abc"), None);
        assert_eq!(last_terminator(b"a\nb"), Some(1));
        assert_eq!(last_terminator(b"a\r\n"), Some(2));
        assert_eq!(last_terminator(b"a\rb"), Some(1));
        assert_eq!(last_terminator(b"ab\r"), None);
        assert_eq!(last_terminator(b"a\nb\r"), Some(1));
    }
}
