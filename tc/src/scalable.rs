//! Scalable output (pipeline component 12, design §4.8): the finished
//! container bytes are handed off to a linked list of fixed-size segments
//! allocated via anonymous `mmap` rather than living twice over (once in the
//! driver's `executable.bytes`, once in the OS's own write buffer). The
//! streaming mode the driver uses opens the output file up front and flushes
//! full segments to it as they fill, so peak memory during the final write
//! stays bounded even for a very large generated executable. `CodeBuffer`
//! itself (pipeline component 1) stays a fixed-capacity in-memory buffer —
//! its fixup patching is offset-addressed and mid-codegen handoff to
//! segments would break it — so overflowing it is still a hard compile
//! error rather than a segment handoff.

use std::fs::File;
use std::io::{self, Write};

/// Default segment size: 64 MiB, per design §4.8.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

struct Segment {
    ptr: *mut u8,
    len: usize,
    cap: usize,
}

impl Segment {
    fn new(cap: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                cap,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { ptr: ptr as *mut u8, len: 0, cap })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Append as much of `bytes` as fits; returns the number of bytes taken.
    fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.cap - self.len;
        let n = room.min(bytes.len());
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(self.len), n);
        }
        self.len += n;
        n
    }

    fn is_full(&self) -> bool {
        self.len == self.cap
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.cap);
        }
    }
}

// Segments are only ever accessed through the owning `ScalableBuffer`, never
// shared across threads (design §5: single-threaded, synchronous compiler).
unsafe impl Send for Segment {}

/// Running totals exposed for diagnostics (design §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalableStats {
    pub total_size: usize,
    pub peak_memory: usize,
    pub segments_allocated: usize,
    pub bytes_streamed: usize,
}

/// A code buffer that overflows the primary in-memory buffer into mmap'd
/// segments above `segment_size`, optionally streaming completed segments to
/// an output file as they fill.
pub struct ScalableBuffer {
    segment_size: usize,
    segments: Vec<Segment>,
    stream: Option<File>,
    stats: ScalableStats,
}

impl ScalableBuffer {
    pub fn new(segment_size: usize) -> Self {
        Self { segment_size, segments: Vec::new(), stream: None, stats: ScalableStats::default() }
    }

    /// Open `path` up front and flush full segments to it as they complete,
    /// rather than holding every segment in memory until [`Self::finalize`].
    pub fn with_streaming(segment_size: usize, path: &str) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self { segment_size, segments: Vec::new(), stream: Some(file), stats: ScalableStats::default() })
    }

    fn current_memory(&self) -> usize {
        self.segments.len() * self.segment_size
    }

    fn update_peak(&mut self) {
        let now = self.current_memory();
        if now > self.stats.peak_memory {
            self.stats.peak_memory = now;
        }
    }

    /// Append `bytes`, allocating new segments as needed and streaming out
    /// any segment that fills completely.
    pub fn push_bytes(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            if self.segments.last().map(|s| s.is_full()).unwrap_or(true) {
                self.segments.push(Segment::new(self.segment_size)?);
                self.stats.segments_allocated += 1;
                self.update_peak();
            }
            let seg = self.segments.last_mut().expect("just ensured a non-full segment exists");
            let taken = seg.append(bytes);
            self.stats.total_size += taken;
            bytes = &bytes[taken..];

            if seg.is_full() {
                self.flush_if_streaming(self.segments.len() - 1)?;
            }
        }
        Ok(())
    }

    fn flush_if_streaming(&mut self, index: usize) -> io::Result<()> {
        if let Some(file) = self.stream.as_mut() {
            let bytes = self.segments[index].as_slice();
            file.write_all(bytes)?;
            self.stats.bytes_streamed += bytes.len();
        }
        Ok(())
    }

    /// Flush every unflushed byte (the streaming file's tail segment, or
    /// everything if streaming was never enabled) and return whatever wasn't
    /// already written to disk.
    pub fn finalize(mut self) -> io::Result<Vec<u8>> {
        if self.stream.is_some() {
            let last = self.segments.len().saturating_sub(1);
            if !self.segments.is_empty() {
                self.flush_if_streaming(last)?;
            }
            if let Some(file) = self.stream.as_mut() {
                file.flush()?;
            }
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.stats.total_size);
        for seg in &self.segments {
            out.extend_from_slice(seg.as_slice());
        }
        Ok(out)
    }

    pub fn stats(&self) -> ScalableStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_spanning_a_segment_boundary_are_preserved() {
        let mut buf = ScalableBuffer::new(16);
        buf.push_bytes(&[1; 10]).unwrap();
        buf.push_bytes(&[2; 10]).unwrap();
        let stats = buf.stats();
        assert_eq!(stats.segments_allocated, 2);
        assert_eq!(stats.total_size, 20);
        let out = buf.finalize().unwrap();
        assert_eq!(out.len(), 20);
        assert_eq!(&out[0..10], &[1; 10]);
        assert_eq!(&out[10..20], &[2; 10]);
    }

    #[test]
    fn streaming_mode_writes_completed_segments_to_disk() {
        let path = std::env::temp_dir().join(format!("tc-scalable-test-{}", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        let mut buf = ScalableBuffer::with_streaming(16, &path_str).unwrap();
        buf.push_bytes(&[7; 16]).unwrap();
        let stats_before_finalize = buf.stats();
        assert_eq!(stats_before_finalize.bytes_streamed, 16);
        buf.finalize().unwrap();
        let on_disk = std::fs::read(&path_str).unwrap();
        assert_eq!(on_disk, vec![7u8; 16]);
        std::fs::remove_file(&path_str).ok();
    }
}
