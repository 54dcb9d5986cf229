// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output streams.
//!
//! The OUT/OUTL opcodes render values to the runtime's default output
//! stream; the heap preallocates stdout and stderr, and programs (or
//! tests) can add file streams and in-memory capture buffers. Sockets
//! and pipes are the host's business, not the VM's.
//!
//! Streams are internally synchronized and always pooled shared; the pool
//! hands out `Arc`s so a slow write never holds pool locks.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Heap, StreamHandle};

enum Sink {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    File(BufWriter<File>),
    Buffer(Vec<u8>),
}

/// A writable byte sink with interior locking.
pub struct Stream {
    sink: Mutex<Sink>,
}

impl Stream {
    pub fn stdout() -> Self {
        Stream {
            sink: Mutex::new(Sink::Stdout(io::stdout())),
        }
    }

    pub fn stderr() -> Self {
        Stream {
            sink: Mutex::new(Sink::Stderr(io::stderr())),
        }
    }

    /// Create (truncating) a file stream.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Stream {
            sink: Mutex::new(Sink::File(BufWriter::new(File::create(path)?))),
        })
    }

    /// Open a file stream positioned at the end, creating it if needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        Ok(Stream {
            sink: Mutex::new(Sink::File(BufWriter::new(file))),
        })
    }

    /// An in-memory sink whose contents can be read back; stands in for
    /// a pipe when testing program output.
    pub fn buffer() -> Self {
        Stream {
            sink: Mutex::new(Sink::Buffer(Vec::new())),
        }
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Stdout(out) => out.write_all(text.as_bytes()),
            Sink::Stderr(err) => err.write_all(text.as_bytes()),
            Sink::File(file) => file.write_all(text.as_bytes()),
            Sink::Buffer(buf) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Stdout(out) => out.flush(),
            Sink::Stderr(err) => err.flush(),
            Sink::File(file) => file.flush(),
            Sink::Buffer(_) => Ok(()),
        }
    }

    /// Captured bytes of a buffer stream; `None` for real sinks.
    pub fn contents(&self) -> Option<String> {
        let sink = self.sink.lock();
        match &*sink {
            Sink::Buffer(buf) => Some(String::from_utf8_lossy(buf).into_owned()),
            _ => None,
        }
    }
}

impl Heap {
    /// Open a file stream (created or truncated), refcount 1.
    pub fn stream_open(&self, path: &Path) -> io::Result<StreamHandle> {
        let stream = Stream::create(path)?;
        Ok(self.streams.allocate_with(true, Arc::new(stream)))
    }

    /// Open a file stream for appending, refcount 1.
    pub fn stream_open_append(&self, path: &Path) -> io::Result<StreamHandle> {
        let stream = Stream::append(path)?;
        Ok(self.streams.allocate_with(true, Arc::new(stream)))
    }

    /// Allocate an in-memory capture stream, refcount 1.
    pub fn stream_buffer(&self) -> StreamHandle {
        self.streams.allocate_with(true, Arc::new(Stream::buffer()))
    }

    pub fn stream_reference(&self, handle: StreamHandle) -> StreamHandle {
        self.streams.reference(handle)
    }

    /// Give up one reference; the last one flushes best-effort.
    pub fn stream_release(&self, handle: StreamHandle) {
        if let Some(stream) = self.streams.release(handle) {
            if let Err(e) = stream.flush() {
                log::warn!("[stream] flush on release failed: {}", e);
            }
        }
    }

    pub fn stream_write(&self, handle: StreamHandle, text: &str) -> io::Result<()> {
        let stream = self.streams.with(handle, Arc::clone);
        stream.write_str(text)
    }

    pub fn stream_flush(&self, handle: StreamHandle) -> io::Result<()> {
        let stream = self.streams.with(handle, Arc::clone);
        stream.flush()
    }

    /// Captured text of a buffer stream; empty for real sinks.
    pub fn stream_contents(&self, handle: StreamHandle) -> String {
        let stream = self.streams.with(handle, Arc::clone);
        stream.contents().unwrap_or_default()
    }
}
