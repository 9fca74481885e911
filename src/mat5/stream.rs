//! Length-bounded framed sub-streams over a sequential byte source.
//!
//! Every data element's payload is served through a [`Frame`]: a window of
//! `len` bytes followed by `padding` alignment bytes that are consumed
//! silently once the payload is exhausted. Compressed elements layer a
//! zlib decoder over an inner, padding-free frame bounded by the compressed
//! length, so the decoder can never read past the element.
//!
//! Nesting is by ownership transfer: a frame owns the source it reads from,
//! and [`Frame::into_source`] gives it back when the frame is done. The
//! parent level is never read while a child frame is alive.

use std::io::{self, Read};

use flate2::read::ZlibDecoder;
use log::warn;

/// Where a frame's bytes come from: the raw input or an enclosing frame.
pub(crate) enum Source<'a> {
    Raw(Box<dyn Read + 'a>),
    Frame(Box<Frame<'a>>),
}

impl Read for Source<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Raw(r) => r.read(buf),
            Source::Frame(f) => f.read(buf),
        }
    }
}

/// A length-bounded sub-stream, optionally behind a zlib decoder.
pub(crate) enum Frame<'a> {
    Plain {
        src: Source<'a>,
        len: u32,
        padding: u8,
    },
    Inflate {
        decoder: ZlibDecoder<Box<Frame<'a>>>,
    },
}

impl<'a> Frame<'a> {
    pub fn plain(src: Source<'a>, len: u32, padding: u8) -> Self {
        Frame::Plain { src, len, padding }
    }

    /// Frame a compressed element of `comp_len` bytes. The compressed wire
    /// form carries no trailing padding of its own.
    pub fn inflate(src: Source<'a>, comp_len: u32) -> Self {
        let inner = Frame::Plain {
            src,
            len: comp_len,
            padding: 0,
        };
        Frame::Inflate {
            decoder: ZlibDecoder::new(Box::new(inner)),
        }
    }

    /// Payload bytes still to be served; unknowable behind a decoder.
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Frame::Plain { len, .. } => Some(*len as u64),
            Frame::Inflate { .. } => None,
        }
    }

    /// Tear the frame down and return the underlying source, positioned
    /// just past the element. Unread payload or padding is drained so the
    /// enclosing stream stays aligned, with a diagnostic.
    pub fn into_source(self) -> Source<'a> {
        match self {
            Frame::Plain {
                mut src,
                len,
                padding,
            } => {
                let left = len as u64 + padding as u64;
                if left > 0 {
                    warn!("dropping element stream with {} bytes unread", left);
                    drain(&mut src, left);
                }
                src
            }
            Frame::Inflate { decoder } => {
                let inner = decoder.into_inner();
                (*inner).into_source()
            }
        }
    }
}

impl Read for Frame<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Frame::Plain { src, len, padding } => {
                if *len == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let want = buf.len().min(*len as usize);
                let n = src.read(&mut buf[..want])?;
                *len -= n as u32;
                if *len == 0 {
                    eat_padding(src, padding)?;
                }
                Ok(n)
            }
            Frame::Inflate { decoder } => decoder.read(buf),
        }
    }
}

/// Consume and discard the alignment bytes after a payload. Non-zero
/// padding is tolerated but reported.
fn eat_padding(src: &mut Source<'_>, padding: &mut u8) -> io::Result<()> {
    if *padding == 0 {
        return Ok(());
    }
    let n = *padding as usize;
    *padding = 0;
    let mut pad = [0u8; 8];
    let mut got = 0;
    while got < n {
        let r = src.read(&mut pad[got..n])?;
        if r == 0 {
            break;
        }
        got += r;
    }
    if pad[..got].iter().any(|b| *b != 0) {
        warn!("element padding not null: {:?}", &pad[..got]);
    }
    Ok(())
}

fn drain(src: &mut Source<'_>, mut left: u64) {
    let mut sink = [0u8; 4096];
    while left > 0 {
        let want = sink.len().min(left as usize);
        match src.read(&mut sink[..want]) {
            Ok(0) | Err(_) => break,
            Ok(n) => left -= n as u64,
        }
    }
}
