use super::monitor::Monitor;
use super::scrollback::ScrollbackBuffer;
use encoding_rs::{CoderResult, Decoder, Encoding};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const MAX_CHUNK_SIZE: usize = 32 * 1024;
pub const MAX_BYTES_PER_SEC: usize = 1024 * 1024;

/// How PTY output for one window is delivered.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Window charset; anything UTF-8 (or unknown) is passed through.
    pub encoding: String,
    /// Bound chunk size and output rate.
    pub optimal_output: bool,
    /// Append-mode log file. `%n` expands to the window label.
    pub log_file: Option<PathBuf>,
}

/// Build the writer the output task copies into:
/// chunking/rate limit → charset conversion → {terminal, log, scrollback, monitor}.
pub fn build(
    terminal: Box<dyn Write + Send>,
    scrollback: Arc<ScrollbackBuffer>,
    monitor: Option<Arc<Monitor>>,
    window_label: &str,
    options: &PipelineOptions,
) -> Box<dyn Write + Send> {
    let mut sinks: Vec<Box<dyn Write + Send>> = vec![terminal];
    if let Some(template) = &options.log_file {
        let path = expand_log_path(template, window_label);
        match open_log(&path) {
            Ok(file) => sinks.push(Box::new(file)),
            Err(e) => warn!("pipeline: cannot open log file {}: {e}", path.display()),
        }
    }
    sinks.push(Box::new(ScrollbackSink(scrollback)));
    if let Some(monitor) = monitor {
        sinks.push(Box::new(MonitorTap(monitor)));
    }

    let converted = EncodingWriter::new(FanOut::new(sinks), &options.encoding);
    if options.optimal_output {
        Box::new(ChunkedWriter::new(
            RateLimitedWriter::new(converted, MAX_BYTES_PER_SEC),
            MAX_CHUNK_SIZE,
        ))
    } else {
        Box::new(converted)
    }
}

fn expand_log_path(template: &Path, window_label: &str) -> PathBuf {
    let text = template.to_string_lossy();
    if text.contains("%n") {
        PathBuf::from(text.replace("%n", window_label))
    } else {
        template.to_path_buf()
    }
}

fn open_log(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writes every buffer to all sinks in order. The first failing sink fails
/// the write.
pub struct FanOut {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Box<dyn Write + Send>>) -> Self {
        Self { sinks }
    }
}

impl Write for FanOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

struct ScrollbackSink(Arc<ScrollbackBuffer>);

impl Write for ScrollbackSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MonitorTap(Arc<Monitor>);

impl Write for MonitorTap {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.0.record_output();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transcodes a legacy charset to UTF-8. Multi-byte state carries across
/// writes.
pub struct EncodingWriter<W> {
    inner: W,
    decoder: Option<Decoder>,
}

impl<W: Write> EncodingWriter<W> {
    pub fn new(inner: W, label: &str) -> Self {
        Self {
            inner,
            decoder: lookup(label).map(|e| e.new_decoder_without_bom_handling()),
        }
    }
}

fn lookup(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let encoding = Encoding::for_label(label.as_bytes())?;
    if encoding == encoding_rs::UTF_8 {
        return None;
    }
    Some(encoding)
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(decoder) = self.decoder.as_mut() else {
            return self.inner.write(buf);
        };

        let mut input = buf;
        loop {
            let capacity = decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() * 3 + 16);
            let mut out = String::with_capacity(capacity);
            let (result, read, _) = decoder.decode_to_string(input, &mut out, false);
            self.inner.write_all(out.as_bytes())?;
            input = &input[read..];
            if result == CoderResult::InputEmpty {
                break;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Splits large writes into bounded chunks.
pub struct ChunkedWriter<W> {
    inner: W,
    chunk_size: usize,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W, chunk_size: usize) -> Self {
        Self { inner, chunk_size }
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.chunk_size == 0 {
            return self.inner.write(buf);
        }
        for chunk in buf.chunks(self.chunk_size) {
            self.inner.write_all(chunk)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Sleeps after each write so throughput stays under `bytes_per_sec`.
pub struct RateLimitedWriter<W> {
    inner: W,
    bytes_per_sec: usize,
    last_write: Option<Instant>,
}

impl<W: Write> RateLimitedWriter<W> {
    pub fn new(inner: W, bytes_per_sec: usize) -> Self {
        Self {
            inner,
            bytes_per_sec,
            last_write: None,
        }
    }
}

impl<W: Write> Write for RateLimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bytes_per_sec == 0 {
            return self.inner.write(buf);
        }
        let started = *self.last_write.get_or_insert_with(Instant::now);

        let n = self.inner.write(buf)?;
        if n > 0 {
            let expected = Duration::from_secs_f64(n as f64 / self.bytes_per_sec as f64);
            let elapsed = started.elapsed();
            if expected > elapsed {
                std::thread::sleep(expected - elapsed);
            }
            self.last_write = Some(Instant::now());
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A `Write` whose contents the test can inspect after the pipeline
    /// has taken ownership of it.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct CountingWriter {
        writes: Vec<usize>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fan_out_reaches_terminal_and_scrollback() {
        let terminal = SharedBuf::default();
        let scrollback = Arc::new(ScrollbackBuffer::new(10));
        let mut pipeline = build(
            Box::new(terminal.clone()),
            scrollback.clone(),
            None,
            "0",
            &PipelineOptions::default(),
        );

        pipeline.write_all(b"one\r\ntwo\r\n").unwrap();
        assert_eq!(terminal.contents(), b"one\r\ntwo\r\n".to_vec());
        assert_eq!(scrollback.lines(0..10), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_log_file_receives_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let template = dir.path().join("logs").join("screenlog.%n");
        let options = PipelineOptions {
            log_file: Some(template),
            ..Default::default()
        };
        let mut pipeline = build(
            Box::new(io::sink()),
            Arc::new(ScrollbackBuffer::new(10)),
            None,
            "3",
            &options,
        );
        pipeline.write_all(b"logged").unwrap();
        pipeline.flush().unwrap();

        let logged = std::fs::read(dir.path().join("logs").join("screenlog.3")).unwrap();
        assert_eq!(logged, b"logged".to_vec());
    }

    #[test]
    fn test_encoding_conversion() {
        let out = SharedBuf::default();
        let mut writer = EncodingWriter::new(out.clone(), "ISO-8859-1");
        writer.write_all(&[b'c', 0xe9]).unwrap();
        assert_eq!(String::from_utf8(out.contents()).unwrap(), "cé");

        let out = SharedBuf::default();
        let mut writer = EncodingWriter::new(out.clone(), "KOI8-R");
        writer.write_all(&[0xc1]).unwrap();
        assert_eq!(String::from_utf8(out.contents()).unwrap(), "а");
    }

    #[test]
    fn test_utf8_passes_through_untouched() {
        let out = SharedBuf::default();
        let mut writer = EncodingWriter::new(out.clone(), "UTF-8");
        writer.write_all(&[0xff, 0xfe, b'x']).unwrap();
        assert_eq!(out.contents(), vec![0xff, 0xfe, b'x']);
    }

    #[test]
    fn test_chunked_writer_bounds_writes() {
        let mut writer = ChunkedWriter::new(CountingWriter { writes: Vec::new() }, 4);
        writer.write_all(&[0u8; 10]).unwrap();
        assert_eq!(writer.inner.writes, vec![4, 4, 2]);
    }

    #[test]
    fn test_rate_limited_writer_throttles() {
        let mut writer = RateLimitedWriter::new(io::sink(), 1000);
        let start = Instant::now();
        writer.write_all(&[0u8; 50]).unwrap();
        writer.write_all(&[0u8; 50]).unwrap();
        // 100 bytes at 1000 B/s is at least ~100ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
