//! Header negotiation and data-element lexing.

use std::io::Read;

use log::debug;

use super::error::{Mat5Error, Result};
use super::models::DataType;
use super::stream::{Frame, Source};
use super::utils::{self, fill_or_eof};

/// Length of the descriptive text field at the start of the header.
pub(crate) const HEADER_TEXT_LEN: usize = 116;
/// Length of the subsystem data offset field. Opaque; read and ignored.
pub(crate) const HEADER_SUBSYS_LEN: usize = 8;
const HEADER_MAGIC: &[u8] = b"MATLAB 5.0 MAT-file";
/// The only version this format level knows.
pub(crate) const FORMAT_VERSION: u16 = 0x0100;
/// `MI` endianness marker in host order; reversed bytes mean byte-swap.
pub(crate) const ENDIAN_MARKER: u16 = 0x4d49;

/// One lexed element, or the end of the current stream.
pub(crate) enum DataElement<'a> {
    End,
    Error,
    Element { ty: u8, frame: Frame<'a> },
}

/// Splits a byte stream into data elements.
///
/// A lexer either sits on the raw input (the root) or on the frame of a
/// matrix element (one nested lexer per matrix level). While an element's
/// payload is out being consumed, the lexer's source is parked inside that
/// element's frame and must be handed back through [`Lexer::restore`].
pub(crate) struct Lexer<'a> {
    src: Option<Source<'a>>,
    swap: bool,
}

impl std::fmt::Debug for Lexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexer").field("swap", &self.swap).finish()
    }
}

impl<'a> Lexer<'a> {
    /// Attach to the raw input. With `expect_header` the 128-byte file
    /// header is read and validated, and the byte-swap flag is negotiated
    /// from its endianness marker.
    pub fn from_reader(mut input: Box<dyn Read + 'a>, expect_header: bool) -> Result<Self> {
        let mut swap = false;
        if expect_header {
            swap = read_header(&mut input)?;
        }
        Ok(Lexer {
            src: Some(Source::Raw(input)),
            swap,
        })
    }

    /// Attach to a matrix element's payload, inheriting the byte-swap flag.
    pub fn from_frame(frame: Frame<'a>, swap: bool) -> Self {
        Lexer {
            src: Some(Source::Frame(Box::new(frame))),
            swap,
        }
    }

    pub fn needs_byte_swap(&self) -> bool {
        self.swap
    }

    /// Lex the next element.
    ///
    /// The two tag layouts are told apart by the raw bytes of the first
    /// word: bytes 1 and 2 are zero in a normal tag's type word in either
    /// byte order, while a small tag has its non-zero length in one of
    /// them. Within the small word the type sits in the low half and the
    /// length in the high half -- the published layout has them the other
    /// way around, but this is what MATLAB's encoder emits.
    pub fn next_element(&mut self) -> DataElement<'a> {
        let mut src = match self.src.take() {
            Some(s) => s,
            None => return DataElement::Error,
        };

        let mut word = [0u8; 4];
        match fill_or_eof(&mut src, &mut word) {
            Ok(true) => {}
            Ok(false) => {
                self.src = Some(src);
                return DataElement::End;
            }
            Err(_) => {
                self.src = Some(src);
                return DataElement::Error;
            }
        }

        if word[1] != 0 || word[2] != 0 {
            // small data element: tag and payload share 8 bytes
            let val = correct32(u32::from_ne_bytes(word), self.swap);
            let ty = (val & 0xffff) as u16;
            let len = val >> 16;
            if len > 4 {
                self.src = Some(src);
                return DataElement::Error;
            }
            debug!("small element: type {} len {}", ty, len);
            let padding = utils::padding_for(len, 4);
            DataElement::Element {
                ty: ty as u8,
                frame: Frame::plain(src, len, padding),
            }
        } else {
            let ty = correct32(u32::from_ne_bytes(word), self.swap);
            let len = match utils::read_scalar::<u32>(&mut src, self.swap) {
                Ok(Some(v)) => v,
                _ => {
                    self.src = Some(src);
                    return DataElement::Error;
                }
            };
            if ty == DataType::Compressed as u32 {
                // the real tag sits at the start of the decompressed stream
                let mut frame = Frame::inflate(src, len);
                let inner_ty = utils::read_scalar::<u32>(&mut frame, self.swap);
                let inner_len = utils::read_scalar::<u32>(&mut frame, self.swap);
                match (inner_ty, inner_len) {
                    (Ok(Some(ty)), Ok(Some(len))) => {
                        debug!("compressed element: inner type {} len {}", ty, len);
                        DataElement::Element {
                            ty: ty as u8,
                            frame,
                        }
                    }
                    _ => {
                        self.src = Some(frame.into_source());
                        DataElement::Error
                    }
                }
            } else {
                debug!("element: type {} len {}", ty, len);
                let padding = utils::padding_for(len, 8);
                DataElement::Element {
                    ty: ty as u8,
                    frame: Frame::plain(src, len, padding),
                }
            }
        }
    }

    /// Hand an element's frame back so lexing can continue after it.
    pub fn restore(&mut self, frame: Frame<'a>) {
        debug_assert!(self.src.is_none(), "restore with an element still out");
        self.src = Some(frame.into_source());
    }

    /// Recover the matrix frame from a finished nested lexer.
    pub fn into_frame(self) -> Option<Frame<'a>> {
        match self.src {
            Some(Source::Frame(f)) => Some(*f),
            _ => None,
        }
    }

    /// Discard everything left on the current source.
    pub fn read_all(&mut self) {
        if let Some(src) = self.src.as_mut() {
            let mut buf = [0u8; 4096];
            while matches!(src.read(&mut buf), Ok(n) if n > 0) {}
        }
    }
}

fn correct32(v: u32, swap: bool) -> u32 {
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

/// Validate the file header and negotiate the byte order.
fn read_header(input: &mut (impl Read + ?Sized)) -> Result<bool> {
    let short = |_| Mat5Error::InvalidHeader("file too short for header");

    let mut text = [0u8; HEADER_TEXT_LEN];
    input.read_exact(&mut text).map_err(short)?;
    if !text.starts_with(HEADER_MAGIC) {
        return Err(Mat5Error::InvalidHeader("missing MATLAB 5.0 banner"));
    }

    let mut subsys = [0u8; HEADER_SUBSYS_LEN];
    input.read_exact(&mut subsys).map_err(short)?;

    let mut flags = [0u8; 4];
    input.read_exact(&mut flags).map_err(short)?;

    let mi = ENDIAN_MARKER.to_ne_bytes();
    let swap = if flags[2] == mi[0] && flags[3] == mi[1] {
        false
    } else if flags[2] == mi[1] && flags[3] == mi[0] {
        true
    } else {
        return Err(Mat5Error::InvalidHeader("unrecognized endianness marker"));
    };

    let version = u16::from_ne_bytes([flags[0], flags[1]]);
    let version = if swap { version.swap_bytes() } else { version };
    if version != FORMAT_VERSION {
        return Err(Mat5Error::UnsupportedVersion(version));
    }

    debug!("header accepted, byte swap: {}", swap);
    Ok(swap)
}
