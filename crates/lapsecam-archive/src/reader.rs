use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    fs::File,
    io::{AsyncRead, ReadBuf},
    sync::OwnedRwLockReadGuard,
};

/// Open lapse artifact plus the archive's shared lock.
///
/// A publish needs the exclusive lock, so the file cannot be replaced while this is alive.
pub struct LapseReader {
    file: File,
    len: u64,
    name: String,
    _guard: OwnedRwLockReadGuard<()>,
}

impl LapseReader {
    pub(crate) fn new(file: File, len: u64, name: String, guard: OwnedRwLockReadGuard<()>) -> Self {
        Self {
            file,
            len,
            name,
            _guard: guard,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsyncRead for LapseReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}
