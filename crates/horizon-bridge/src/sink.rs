//! Pluggable destinations for diagnostic text.
//!
//! A [`LogSink`] accepts text and never fails. Components that report
//! outcomes take a sink explicitly instead of writing to a process-wide
//! logger, so output can be pointed at a document, a buffer, a file or
//! `tracing` without touching call-dispatch code.
//!
//! # Document output
//!
//! [`DocumentSink`] appends every emission as its own `<div>` block to an
//! [`HtmlDocument`], so successive messages stay visually separate:
//!
//! ```ignore
//! use horizon_bridge::sink::{DocumentSink, LogSink};
//!
//! let sink = DocumentSink::new("target");
//! sink.emit("NotFound: user 123 does not exist");
//! let html = sink.document().render();
//! ```
//!
//! # Routing `tracing` into a sink
//!
//! [`SinkMakeWriter`] lets a `tracing_subscriber` fmt layer write formatted
//! events into any sink:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_ansi(false)
//!     .with_writer(SinkMakeWriter::new(sink.clone()))
//!     .init();
//! ```

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::targets;

/// A destination for diagnostic text.
///
/// Implementations must not panic and have no way to report failure;
/// whatever cannot be delivered is dropped.
pub trait LogSink: Send + Sync {
    /// Deliver one message.
    fn emit(&self, text: &str);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn emit(&self, text: &str) {
        (**self).emit(text)
    }
}

impl<S: LogSink + ?Sized> LogSink for &S {
    fn emit(&self, text: &str) {
        (**self).emit(text)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _text: &str) {}
}

/// Forwards messages to `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, text: &str) {
        tracing::info!(target: targets::SINK, "{}", text);
    }
}

/// Captures messages in memory. Mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    entries: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of emissions so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return everything emitted so far.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock())
    }
}

impl LogSink for BufferSink {
    fn emit(&self, text: &str) {
        self.entries.lock().push(text.to_string());
    }
}

/// Writes one line per message to an `io::Write`.
///
/// Write errors are swallowed.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<io::Stdout> {
    /// A sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn emit(&self, text: &str) {
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{}", text.trim_end_matches('\n'));
        let _ = writer.flush();
    }
}

impl<W: Write + Send> std::fmt::Debug for WriterSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

/// A minimal HTML document with one container element.
///
/// Blocks are stored already escaped and rendered in insertion order.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    container_id: String,
    blocks: Vec<String>,
}

impl HtmlDocument {
    /// Create an empty document whose container has the given `id`.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            blocks: Vec::new(),
        }
    }

    /// Append a text block. Markup in `text` is escaped.
    pub fn append_block(&mut self, text: &str) {
        self.blocks.push(escape_html(text));
    }

    /// The escaped blocks in insertion order.
    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }

    /// Render only the container element.
    pub fn render_container(&self) -> String {
        let mut out = format!("<div id=\"{}\">\n", escape_html(&self.container_id));
        for block in &self.blocks {
            out.push_str("<div>");
            out.push_str(block);
            out.push_str("</div>\n");
        }
        out.push_str("</div>\n");
        out
    }

    /// Render a complete standalone page.
    pub fn render(&self) -> String {
        format!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>horizon-bridge</title>\n</head>\n<body>\n{}</body>\n</html>\n",
            self.render_container()
        )
    }
}

/// The default sink: each emission becomes a block in an [`HtmlDocument`].
#[derive(Debug, Clone)]
pub struct DocumentSink {
    document: Arc<Mutex<HtmlDocument>>,
}

impl DocumentSink {
    /// Create a sink over a fresh document with the given container id.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            document: Arc::new(Mutex::new(HtmlDocument::new(container_id))),
        }
    }

    /// Snapshot of the document as it is now.
    pub fn document(&self) -> HtmlDocument {
        self.document.lock().clone()
    }
}

impl LogSink for DocumentSink {
    fn emit(&self, text: &str) {
        let text = text.trim_end_matches('\n');
        if text.is_empty() {
            return;
        }
        self.document.lock().append_block(text);
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// An `io::Write` that hands every write to a sink as one message.
pub struct SinkWriter {
    sink: Arc<dyn LogSink>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.emit(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A `MakeWriter` that routes `tracing_subscriber` output into a sink.
#[derive(Clone)]
pub struct SinkMakeWriter {
    sink: Arc<dyn LogSink>,
}

impl SinkMakeWriter {
    /// Create a writer factory for `sink`.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SinkMakeWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            sink: self.sink.clone(),
        }
    }
}
