use crate::errors::{CorruptStream, SmlzError};
use crate::format::{Command, Header};
use bitstream_io::{BigEndian, BitRead, BitReader};
use std::{
    convert::TryFrom,
    fs::File,
    io::{BufReader, Cursor, Read, Write},
    iter,
    path::Path,
};

type LogWtr<'a> = &'a mut dyn Write;

/// Upper bound on the output buffer reserved before decoding starts
const INITIAL_CAPACITY: usize = 0x4000;

/// Specify the decoding settings, such as the output limit, logging, and input.
///
/// To create a new `Decoder`, use [`for_reader()`], [`for_bytes()`], or
/// [`for_file()`]. Then, change any of the decoder settings.
/// Finally, decode the input data with [`decode()`].
/// ```
/// # use smlz::{EncoderBuilder, Decoder};
/// let original = b"ABBACABBACD";
/// let compressed = EncoderBuilder::for_bytes(original)
///     .encode_to_vec()
///     .unwrap();
/// let decompressed = Decoder::for_bytes(&compressed)
///     .decode()
///     .unwrap();
/// assert_eq!(&original[..], decompressed);
/// ```
/// Compressed data is usually embedded in a larger file without any length information.
/// After decoding, [`bytes_read()`] tells you how much of the input the stream took up:
/// ```
/// # use smlz::Decoder;
/// let rom = [0x23, 0x10, 0xFF, 0x12, 0x34];
/// let mut decoder = Decoder::for_bytes(&rom);
/// assert_eq!(decoder.decode().unwrap(), [0x10; 4]);
/// assert_eq!(decoder.bytes_read(), 3);
/// ```
/// By default, decoding only stops at the stream's termination code. Use [`max_size()`]
/// to stop after a known number of bytes instead:
/// ```
/// # use smlz::Decoder;
/// let decompressed = Decoder::for_bytes(&[0x23, 0x10, 0xFF])
///     .max_size(2)
///     .decode()
///     .unwrap();
/// assert_eq!(decompressed, [0x10; 2]);
/// ```
/// [`for_reader()`]: Decoder::for_reader
/// [`for_bytes()`]: Decoder::for_bytes
/// [`for_file()`]: Decoder::for_file
/// [`decode()`]: Decoder::decode
/// [`bytes_read()`]: Decoder::bytes_read
/// [`max_size()`]: Decoder::max_size
pub struct Decoder<'a, R: Read> {
    src: BitReader<R, BigEndian>,
    max_size: usize,
    log: Option<LogWtr<'a>>,
    bytes_read: usize,
}

impl<'a, R: Read> Decoder<'a, R> {
    #[inline]
    pub fn for_reader(rdr: R) -> Self {
        Self {
            src: BitReader::endian(rdr, BigEndian),
            max_size: usize::MAX,
            log: None,
            bytes_read: 0,
        }
    }

    /// Stop decoding once `size` bytes have been written, even if that is
    /// partway through a command.
    #[inline]
    pub fn max_size(&mut self, size: usize) -> &mut Self {
        self.max_size = size;
        self
    }

    /// Write each decoded command and its output to `wtr`
    #[inline]
    pub fn with_logging<W: Write>(&mut self, wtr: &'a mut W) -> &mut Self {
        self.log = Some(wtr as LogWtr);
        self
    }

    #[inline]
    pub fn decode(&mut self) -> Result<Vec<u8>, SmlzError> {
        do_decode(self)
    }

    /// Number of compressed bytes consumed by the last call to [`decode()`](Decoder::decode),
    /// including the termination code if it was reached. If decoding failed, this counts
    /// the bytes read up to the error.
    #[inline]
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}

impl<'a> Decoder<'a, Cursor<&'a [u8]>> {
    #[inline]
    pub fn for_bytes(bytes: &'a [u8]) -> Self {
        let rdr = Cursor::new(bytes);
        Self::for_reader(rdr)
    }
}

impl<'a> Decoder<'a, BufReader<File>> {
    #[inline]
    pub fn for_file<P: AsRef<Path>>(p: P) -> Result<Self, SmlzError> {
        File::open(p)
            .map(BufReader::new)
            .map(Self::for_reader)
            .map_err(Into::into)
    }
}

/// Decompress at most `max_size` bytes from `rdr` into a `Vec<u8>`
///
/// This is a convenience function to decode a `Read`er without
/// having to import and set up a [`Decoder`]
pub fn decode<R: Read>(rdr: R, max_size: usize) -> Result<Vec<u8>, SmlzError> {
    Decoder::for_reader(rdr).max_size(max_size).decode()
}

/// Decompress at most `max_size` bytes from the stream that starts at `offset` in `rom`
pub fn decode_at(rom: &[u8], offset: usize, max_size: usize) -> Result<Vec<u8>, SmlzError> {
    let src = rom
        .get(offset..)
        .filter(|src| !src.is_empty())
        .ok_or(SmlzError::OffsetOutOfBounds {
            offset,
            len: rom.len(),
        })?;

    Decoder::for_bytes(src).max_size(max_size).decode()
}

fn do_decode<R: Read>(opt: &mut Decoder<R>) -> Result<Vec<u8>, SmlzError> {
    let Decoder {
        src,
        max_size,
        log,
        bytes_read,
    } = opt;
    let max_size = *max_size;
    let read = bytes_read;
    *read = 0;
    let mut output: Vec<u8> = Vec::with_capacity(max_size.min(INITIAL_CAPACITY));

    while output.len() < max_size {
        let header = match Header::from_bitreader(src, read)? {
            Some(header) => header,
            None => {
                if let Some(wtr) = log.as_mut() {
                    writeln!(wtr, "{:04x} - Termination", output.len())?;
                }
                break;
            }
        };

        let start = output.len();
        let length = header.length.min(max_size - start);

        match header.command {
            Command::DirectCopy => {
                for _ in 0..length {
                    let byte = read_byte(src, read)?;
                    output.push(byte);
                }
            }
            Command::ByteFill => {
                let fill = read_byte(src, read)?;
                output.extend(iter::repeat(fill).take(length));
            }
            Command::WordFill => {
                let word = read_word(src, read)?;
                output.extend(word.iter().cycle().take(length));
            }
            Command::SigmaFill => {
                let fill = read_byte(src, read)?;
                output.extend((0..length).map(|i| fill.wrapping_add(i as u8)));
            }
            cmd @ Command::LibraryCopy | cmd @ Command::XorCopy => {
                let addr = u16::from_le_bytes(read_word(src, read)?);
                let mask = if cmd == Command::XorCopy { 0xFF } else { 0x00 };
                copy_back(&mut output, cmd, addr as isize, length, mask)?;
            }
            Command::MinusCopy => {
                let minus = read_byte(src, read)?;
                let from = start as isize - minus as isize;
                copy_back(&mut output, Command::MinusCopy, from, length, 0x00)?;
            }
        }

        if let Some(wtr) = log.as_mut() {
            writeln!(
                wtr,
                "{:04x} - {} x{} ({} written)",
                start,
                header.command,
                header.length,
                output.len() - start
            )?;
            writeln!(wtr, "\t{:02x?}", &output[start..])?;
        }
    }

    Ok(output)
}

fn read_byte<R: Read>(src: &mut BitReader<R, BigEndian>, read: &mut usize) -> Result<u8, SmlzError> {
    let byte = src.read(8).map_err(|e| SmlzError::reading(e, *read))?;
    *read += 1;

    Ok(byte)
}

fn read_word<R: Read>(
    src: &mut BitReader<R, BigEndian>,
    read: &mut usize,
) -> Result<[u8; 2], SmlzError> {
    Ok([read_byte(src, read)?, read_byte(src, read)?])
}

/// Append `count` bytes to `output`, copied one at a time starting from `output[from]`.
/// The copy can run into the bytes that it is writing.
fn copy_back(
    output: &mut Vec<u8>,
    command: Command,
    from: isize,
    count: usize,
    mask: u8,
) -> Result<(), CorruptStream> {
    for i in 0..count {
        let index = from + i as isize;
        let byte = usize::try_from(index)
            .ok()
            .and_then(|idx| output.get(idx).copied())
            .ok_or(CorruptStream::InvalidBackReference {
                command,
                index,
                produced: output.len(),
            })?;

        output.push(byte ^ mask);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn decoded(stream: &[u8]) -> Result<Vec<u8>, SmlzError> {
        Decoder::for_bytes(stream).decode()
    }

    fn corrupt(stream: &[u8]) -> CorruptStream {
        match decoded(stream) {
            Err(SmlzError::Corrupt(e)) => e,
            other => panic!("expected a corrupt stream for {:02x?}, got {:?}", stream, other),
        }
    }

    #[test]
    fn empty_stream() {
        assert!(decoded(&[0xFF]).unwrap().is_empty());
        assert!(decode(&[0xFFu8][..], 0).unwrap().is_empty());
        assert!(decode(&[0xFFu8][..], 100).unwrap().is_empty());
    }

    #[test]
    fn fills() {
        assert_eq!(decoded(&[0x02, 1, 2, 3, 0xFF]).unwrap(), [1, 2, 3]);
        assert_eq!(decoded(&[0x23, 0x10, 0xFF]).unwrap(), [0x10; 4]);
        assert_eq!(
            decoded(&[0x44, 0xAB, 0xCD, 0xFF]).unwrap(),
            [0xAB, 0xCD, 0xAB, 0xCD, 0xAB]
        );
        assert_eq!(
            decoded(&[0x63, 0xFE, 0xFF]).unwrap(),
            [0xFE, 0xFF, 0x00, 0x01]
        );
    }

    #[test]
    fn overlapping_copies() {
        let library = [0x01, 0xAA, 0xBB, 0x85, 0x00, 0x00, 0xFF];
        assert_eq!(
            decoded(&library).unwrap(),
            [0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB]
        );

        let xor = [0x02, 0x00, 0x0F, 0xF0, 0xA2, 0x00, 0x00, 0xFF];
        assert_eq!(
            decoded(&xor).unwrap(),
            [0x00, 0x0F, 0xF0, 0xFF, 0xF0, 0x0F]
        );

        assert_eq!(decoded(&[0x00, 0x07, 0xC3, 0x01, 0xFF]).unwrap(), [0x07; 5]);
        assert_eq!(
            decoded(&[0x01, 1, 2, 0xC2, 0x02, 0xFF]).unwrap(),
            [1, 2, 1, 2, 1]
        );
    }

    #[test]
    fn extended_direct_copy() {
        let data: Vec<u8> = (0..100).collect();
        let mut stream = vec![0xE0, 0x63];
        stream.extend(&data);
        stream.push(0xFF);

        let mut decoder = Decoder::for_bytes(&stream);
        assert_eq!(decoder.decode().unwrap(), data);
        assert_eq!(decoder.bytes_read(), stream.len());
    }

    #[test]
    fn bad_back_references() {
        use CorruptStream::InvalidBackReference as Bad;

        assert_eq!(
            corrupt(&[0x00, 0x07, 0x81, 0x05, 0x00, 0xFF]),
            Bad {
                command: Command::LibraryCopy,
                index: 5,
                produced: 1
            }
        );
        assert_eq!(
            corrupt(&[0x00, 0x07, 0xA1, 0x01, 0x00, 0xFF]),
            Bad {
                command: Command::XorCopy,
                index: 1,
                produced: 1
            }
        );
        assert_eq!(
            corrupt(&[0x00, 0x07, 0xC1, 0x00, 0xFF]),
            Bad {
                command: Command::MinusCopy,
                index: 1,
                produced: 1
            }
        );
        assert_eq!(
            corrupt(&[0x00, 0x07, 0xC0, 0x05, 0xFF]),
            Bad {
                command: Command::MinusCopy,
                index: -4,
                produced: 1
            }
        );
    }

    #[test]
    fn underruns() {
        assert_eq!(corrupt(&[]), CorruptStream::BufferUnderrun(0));
        assert_eq!(corrupt(&[0x03, 1, 2]), CorruptStream::BufferUnderrun(3));
        assert_eq!(corrupt(&[0x00, 1]), CorruptStream::BufferUnderrun(2));
        assert_eq!(corrupt(&[0x00, 1, 0x81, 0x00]), CorruptStream::BufferUnderrun(4));
        assert_eq!(corrupt(&[0xFD, 0x00]), CorruptStream::ReservedCommand(0xFD));
    }

    #[test]
    fn extended_header_with_short_length() {
        let stream = [0xE0, 0x05, 1, 2, 3, 4, 5, 6, 0xFF];
        let mut decoder = Decoder::for_bytes(&stream);
        assert_eq!(decoder.decode().unwrap(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(decoder.bytes_read(), 9);

        assert_eq!(
            corrupt(&[0xE0, 0x05, 1, 2, 3, 4, 5, 6]),
            CorruptStream::BufferUnderrun(8)
        );
    }

    #[test]
    fn bytes_read_after_an_error() {
        // stops partway through a Library Copy address
        let mut decoder = Decoder::for_bytes(&[0x23, 0x10, 0x81, 0x00]);
        match decoder.decode() {
            Err(SmlzError::Corrupt(CorruptStream::BufferUnderrun(4))) => {}
            other => panic!("expected underrun, got {:?}", other),
        }
        assert_eq!(decoder.bytes_read(), 4);

        // stops between the two bytes of an extended header
        let mut decoder = Decoder::for_bytes(&[0x00, 0x07, 0xE0]);
        assert!(decoder.decode().is_err());
        assert_eq!(decoder.bytes_read(), 3);

        let mut decoder = Decoder::for_bytes(&[0x00, 0x07, 0x81, 0x05, 0x00, 0xFF]);
        assert!(decoder.decode().is_err());
        assert_eq!(decoder.bytes_read(), 5);
    }

    #[test]
    fn size_limit_truncates() {
        let stream = [0x03, 1, 2, 3, 4, 0xFF];
        let mut decoder = Decoder::for_bytes(&stream);
        assert_eq!(decoder.max_size(2).decode().unwrap(), [1, 2]);
        assert_eq!(decoder.bytes_read(), 3);

        // the limit is hit before the missing bytes are needed
        assert_eq!(decode(&[0x03u8, 1, 2][..], 2).unwrap(), [1, 2]);
        assert_eq!(
            decode(&[0x45u8, 0xAB, 0xCD, 0xFF][..], 3).unwrap(),
            [0xAB, 0xCD, 0xAB]
        );
        assert_eq!(
            decode(&[0x00u8, 0x07, 0xC3, 0x01][..], 3).unwrap(),
            [0x07; 3]
        );
    }

    #[test]
    fn decode_from_offset() {
        let rom = [0x55, 0x55, 0x23, 0x10, 0xFF, 0x66];
        assert_eq!(decode_at(&rom, 2, 0x100).unwrap(), [0x10; 4]);

        match decode_at(&rom, 6, 0x100) {
            Err(SmlzError::OffsetOutOfBounds { offset: 6, len: 6 }) => {}
            other => panic!("expected out of bounds, got {:?}", other),
        }
    }

    #[test]
    fn logging() {
        let mut log = Vec::new();
        Decoder::for_bytes(&[0x23, 0x10, 0xFF])
            .with_logging(&mut log)
            .decode()
            .unwrap();

        let log = String::from_utf8(log).unwrap();
        assert!(log.contains("Byte Fill x4"), "{}", log);
        assert!(log.contains("Termination"), "{}", log);
    }
}
