//! Information and structures for the compressed stream format.
//!
//! A compressed stream is a list of commands followed by a termination code.
//! Each command starts with a one or two byte header that holds the command
//! number and how many bytes the command writes to the output. The header is
//! followed by the command's operand, if any.
//!
//! ## Header
//! Commands that write 32 bytes or fewer use the short, one byte header.
//! The length is stored minus one, so `0` means one byte.
//!
//! | Bits | Description |
//! | :--: | ----------- |
//! | 7..5 | command number (0 through 6) |
//! | 4..0 | length - 1 |
//!
//! Longer commands use the extended, two byte header. The first three bits are all set,
//! which is how the decoder tells the two forms apart.
//!
//! | Bits   | Description |
//! | :----: | ----------- |
//! | 15..13 | `111` |
//! | 12..10 | command number (0 through 6) |
//! | 9..0   | length - 1 |
//!
//! A lone `0xFF` byte ends the stream. As a header it would read as an extended
//! header for command 7, which doesn't exist.
//!
//! ## Commands
//!
//! | Num | Command      | Operand | Output |
//! | :-: | ------------ | ------- | ------ |
//! | 0   | Direct Copy  | `length` bytes | the operand bytes, as is |
//! | 1   | Byte Fill    | 1 byte | the byte, `length` times |
//! | 2   | Word Fill    | 2 bytes | the two bytes alternating, stopping after `length` bytes |
//! | 3   | Sigma Fill   | 1 byte | the byte, then the byte plus one, and so on (wrapping) |
//! | 4   | Library Copy | 16-bit little endian address | `length` bytes copied from that address in the output |
//! | 5   | XOR Copy     | 16-bit little endian address | like Library Copy, but each byte is XORed with `0xFF` |
//! | 6   | Minus Copy   | 1 byte | like Library Copy, but the address is the current output size minus the operand |
//!
//! The three copy commands copy one byte at a time, so a copy can read bytes that
//! it wrote itself earlier in the same command.
//!
//! ## An Example
//! Let's encode the bytes `10 10 10 10 05 06 07`, then a run of 100 bytes that
//! doesn't compress.
//! ```text
//! 23        <- Byte Fill (001), length 4 (00011)
//! 10        <- fill byte
//! 62        <- Sigma Fill (011), length 3 (00010)
//! 05        <- starting byte
//! E0 63     <- extended (111), Direct Copy (000), length 100 (0001100011)
//! ...       <- the 100 bytes
//! FF        <- termination code
//! ```

use crate::errors::{CorruptStream, SmlzError};
use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, BE};
use std::fmt;
use std::io::{self, Read, Write};

/// The byte that ends a compressed stream
pub const TERMINATOR: u8 = 0xFF;
/// The longest length that a header can hold
pub const MAX_LENGTH: usize = 1024;
/// The longest run that the encoder will put into a single command
pub const MAX_RUN: usize = 1023;

/// longest length that fits in a one byte header
const SHORT_LENGTH: usize = 32;
/// command bits that mark an extended header
const EXTENDED: u8 = 0b111;

/// The seven commands of the compressed format
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Command {
    DirectCopy = 0,
    ByteFill = 1,
    WordFill = 2,
    SigmaFill = 3,
    LibraryCopy = 4,
    XorCopy = 5,
    MinusCopy = 6,
}

impl Command {
    /// Get the `Command` for the three bit number `tag`, if there is one.
    pub fn from_tag(tag: u8) -> Option<Self> {
        use Command::*;

        match tag {
            0 => Some(DirectCopy),
            1 => Some(ByteFill),
            2 => Some(WordFill),
            3 => Some(SigmaFill),
            4 => Some(LibraryCopy),
            5 => Some(XorCopy),
            6 => Some(MinusCopy),
            _ => None,
        }
    }

    /// The three bit number stored in a header for this command
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::DirectCopy => "Direct Copy",
            Self::ByteFill => "Byte Fill",
            Self::WordFill => "Word Fill",
            Self::SigmaFill => "Sigma Fill",
            Self::LibraryCopy => "Library Copy",
            Self::XorCopy => "XOR Copy",
            Self::MinusCopy => "Minus Copy",
        };
        write!(f, "{}", name)
    }
}

/// The command and output length at the start of every instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub command: Command,
    /// number of bytes written to the output, `1..=MAX_LENGTH`
    pub length: usize,
    /// stored in the two byte form, which a stream may use for short lengths too
    extended: bool,
}

impl Header {
    pub(crate) fn new(command: Command, length: usize) -> Self {
        debug_assert!(length > 0 && length <= MAX_LENGTH);
        Self {
            command,
            length,
            extended: length > SHORT_LENGTH,
        }
    }

    pub(crate) fn is_extended(&self) -> bool {
        self.extended
    }

    /// number of bytes the header takes up in a stream
    pub(crate) fn size(&self) -> usize {
        if self.is_extended() {
            2
        } else {
            1
        }
    }

    /// Read a header from `bits`, or `None` if the termination code was read.
    /// `read` is the number of stream bytes read so far. It is advanced past each
    /// header byte, and is the position reported if the stream runs out.
    pub(crate) fn from_bitreader<R: Read>(
        bits: &mut BitReader<R, BE>,
        read: &mut usize,
    ) -> Result<Option<Self>, SmlzError> {
        let pos = *read;
        let eof = |e: io::Error| SmlzError::reading(e, pos);
        let tag: u8 = bits.read(3).map_err(eof)?;
        let low: u16 = bits.read(5).map_err(eof)?;
        *read += 1;

        if let Some(command) = Command::from_tag(tag) {
            return Ok(Some(Self::new(command, low as usize + 1)));
        }

        // extended header or termination code
        if low == 0b11111 {
            return Ok(None);
        }

        let inner: u16 = bits
            .read(8)
            .map_err(|e| SmlzError::reading(e, *read))?;
        *read += 1;
        let command = Command::from_tag((low >> 2) as u8)
            .ok_or_else(|| CorruptStream::ReservedCommand((EXTENDED << 5) | low as u8))?;
        let length = (((low & 0b11) << 8) | inner) as usize + 1;

        Ok(Some(Self {
            command,
            length,
            extended: true,
        }))
    }

    /// Write `self` to the big endian `BitWriter` in the short or extended form
    pub(crate) fn write<W: Write>(&self, wtr: &mut BitWriter<W, BE>) -> io::Result<()> {
        let val = (self.length - 1) as u16;
        if self.is_extended() {
            wtr.write(3, EXTENDED)?;
            wtr.write(3, self.command.tag())?;
            wtr.write(10, val)
        } else {
            wtr.write(3, self.command.tag())?;
            wtr.write(5, val)
        }
    }
}

/// The bytes that follow a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand<'a> {
    /// Direct Copy data
    Literal(&'a [u8]),
    /// Byte Fill and Sigma Fill start value, or the Minus Copy distance
    Byte(u8),
    /// Word Fill pair, in output order
    Word([u8; 2]),
    /// Library Copy and XOR Copy output address
    Address(u16),
}

impl<'a> Operand<'a> {
    fn size(&self) -> usize {
        match self {
            Self::Literal(bytes) => bytes.len(),
            Self::Byte(_) => 1,
            Self::Word(_) | Self::Address(_) => 2,
        }
    }

    fn write<W: Write>(&self, wtr: &mut BitWriter<W, BE>) -> io::Result<()> {
        match *self {
            Self::Literal(bytes) => wtr.write_bytes(bytes),
            Self::Byte(byte) => wtr.write(8, byte),
            Self::Word(ref word) => wtr.write_bytes(word),
            Self::Address(addr) => wtr.write_bytes(&addr.to_le_bytes()),
        }
    }
}

/// A complete command ready to be written to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Instruction<'a> {
    pub command: Command,
    pub length: usize,
    pub operand: Operand<'a>,
}

impl<'a> Instruction<'a> {
    /// Direct Copy of `bytes`
    pub(crate) fn literal(bytes: &'a [u8]) -> Self {
        Self {
            command: Command::DirectCopy,
            length: bytes.len(),
            operand: Operand::Literal(bytes),
        }
    }

    pub(crate) fn header(&self) -> Header {
        Header::new(self.command, self.length)
    }

    /// total number of stream bytes for this instruction
    pub(crate) fn encoded_size(&self) -> usize {
        self.header().size() + self.operand.size()
    }

    pub(crate) fn write<W: Write>(&self, wtr: &mut BitWriter<W, BE>) -> io::Result<()> {
        self.header().write(wtr)?;
        self.operand.write(wtr)
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} x{}", self.command, self.length)?;
        match self.operand {
            Operand::Literal(bytes) => write!(f, " {:02x?}", bytes),
            Operand::Byte(byte) => write!(f, " [{:02x}]", byte),
            Operand::Word([lo, hi]) => write!(f, " [{:02x}, {:02x}]", lo, hi),
            Operand::Address(addr) => write!(f, " @{:04x}", addr),
        }
    }
}
