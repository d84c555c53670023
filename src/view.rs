//! Offset-window input view (Component B).
//!
//! Wraps a memory-mapped artifact and a fixed `offset`, presenting a
//! zero-copy sub-range of it to a parser. A parser instantiated at some
//! `offset` never observes bytes before that offset: `seek(0)` lands on
//! `offset`, `tell()` reports the position relative to `offset`, and
//! `size` is `parent_size - offset`.
//!
//! Multiple windows may coexist over the same underlying mapping — each
//! carries its own cursor, so unlike the original implementation (which
//! shared one file-descriptor position across views and translated seeks
//! through it), views here never interfere with one another.

use memmap2::Mmap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// A zero-copy view into `[offset, parent_size)` of a memory-mapped file.
#[derive(Clone)]
pub struct OffsetWindow {
    data: Arc<Mmap>,
    offset: u64,
    pos: u64,
}

impl OffsetWindow {
    /// Creates a view starting at `offset` within `data`. `offset` must not
    /// exceed `data.len()`.
    pub fn new(data: Arc<Mmap>, offset: u64) -> Self {
        debug_assert!(offset <= data.len() as u64);
        OffsetWindow {
            data,
            offset,
            pos: 0,
        }
    }

    /// The number of bytes visible through this window.
    pub fn size(&self) -> u64 {
        self.data.len() as u64 - self.offset
    }

    /// The absolute offset within the parent's content that this window's
    /// position 0 corresponds to.
    pub fn base_offset(&self) -> u64 {
        self.offset
    }

    /// The current cursor position, relative to `offset`.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    fn window(&self) -> &[u8] {
        &self.data[self.offset as usize..]
    }

    /// Borrow the remaining bytes from the current cursor to the end of
    /// the window, without advancing it.
    pub fn remaining(&self) -> &[u8] {
        &self.window()[self.pos as usize..]
    }

    /// Borrow the full window as a byte slice, ignoring the cursor.
    pub fn as_slice(&self) -> &[u8] {
        self.window()
    }
}

impl Read for OffsetWindow {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = self.remaining();
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for OffsetWindow {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos: i64 = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size() as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position within the offset window",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mmap_of(bytes: &[u8]) -> Arc<Mmap> {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        Arc::new(unsafe { Mmap::map(&f).unwrap() })
    }

    #[test]
    fn window_hides_bytes_before_offset() {
        let data = mmap_of(b"0123456789");
        let mut view = OffsetWindow::new(data, 3);
        assert_eq!(view.size(), 7);
        let mut buf = [0u8; 3];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"345");
        assert_eq!(view.tell(), 3);
    }

    #[test]
    fn seek_translates_relative_to_offset() {
        let data = mmap_of(b"abcdefgh");
        let mut view = OffsetWindow::new(data, 2);
        view.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 1];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"c");
        view.seek(SeekFrom::End(-1)).unwrap();
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"h");
    }

    #[test]
    fn independent_views_do_not_interfere() {
        let data = mmap_of(b"xxAAAyyy");
        let mut v1 = OffsetWindow::new(data.clone(), 2);
        let mut v2 = OffsetWindow::new(data, 5);
        let mut b1 = [0u8; 3];
        let mut b2 = [0u8; 3];
        v1.read_exact(&mut b1).unwrap();
        v2.read_exact(&mut b2).unwrap();
        assert_eq!(&b1, b"AAA");
        assert_eq!(&b2, b"yyy");
    }
}
