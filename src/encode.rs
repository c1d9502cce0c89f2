use crate::{
    errors::SmlzError,
    format::{Instruction, MAX_RUN, TERMINATOR},
};
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Write},
    path::Path,
};

pub(crate) mod finders;

pub use self::finders::SearchDepth;
use self::finders::{Candidate, FINDERS};

type LogWtr<'a> = &'a mut dyn Write;

/// How the five match finders are run at each input position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Run the finders at the same time on the global `rayon` thread pool
    Parallel,
    /// Run the finders one after another on the calling thread
    Sequential,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::Parallel
    }
}

/// Specify the encoding settings, such as search depth, logging, input, and output
///
/// To create a new `EncoderBuilder`, use [`for_reader()`], [`for_file()`], or [`for_bytes()`].
/// Then, change any of the encoding settings with `EncoderBuilder`'s helper methods.
/// Finally, encode the input data with [`encode_to_writer()`], [`encode_to_file()`], or [`encode_to_vec()`].
/// ```
/// # use smlz::{EncoderBuilder, SearchDepth};
/// let input = b"ABBACABBCADFEGABA";
/// let compressed = EncoderBuilder::for_bytes(input)
///     .search(SearchDepth::Nearest)
///     .with_logging(&mut ::std::io::stdout())
///     .encode_to_vec();
/// ```
///
/// Compressed data is usually written back into a ROM, where it has a fixed amount of space.
/// Set [`max_compressed_size()`] to get an error instead of data that won't fit:
/// ```
/// # use smlz::{EncoderBuilder, SmlzError};
/// let input: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(7)).collect();
/// let result = EncoderBuilder::for_bytes(&input)
///     .max_compressed_size(32)
///     .encode_to_vec();
/// assert!(matches!(result, Err(SmlzError::TooLarge { .. })));
/// ```
///
/// The default encoding settings are as follows:
/// * [`Exhaustive`] match searching
/// * [`Parallel`] match finders
/// * No limit on the compressed size
/// * No logging
///
/// [`for_reader()`]: EncoderBuilder::for_reader
/// [`for_file()`]: EncoderBuilder::for_file
/// [`for_bytes()`]: EncoderBuilder::for_bytes
/// [`encode_to_writer()`]: EncoderBuilder::encode_to_writer
/// [`encode_to_file()`]: EncoderBuilder::encode_to_file
/// [`encode_to_vec()`]: EncoderBuilder::encode_to_vec
/// [`max_compressed_size()`]: EncoderBuilder::max_compressed_size
/// [`Exhaustive`]: SearchDepth::Exhaustive
/// [`Parallel`]: Dispatch::Parallel
pub struct EncoderBuilder<'a, R> {
    rdr: R,
    depth: SearchDepth,
    dispatch: Dispatch,
    limit: Option<usize>,
    log: Option<LogWtr<'a>>,
}

impl<'a, R: Read> EncoderBuilder<'a, R> {
    /// Create a new `EncoderBuilder` for the data in `rdr`.
    #[inline]
    pub fn for_reader(rdr: R) -> Self {
        Self {
            rdr,
            depth: SearchDepth::default(),
            dispatch: Dispatch::default(),
            limit: None,
            log: None,
        }
    }

    /// Set how far back the copy commands search for matches. See [`SearchDepth`].
    #[inline]
    pub fn search(&mut self, depth: SearchDepth) -> &mut Self {
        self.depth = depth;
        self
    }

    /// Set whether the match finders run in parallel. See [`Dispatch`].
    #[inline]
    pub fn dispatch(&mut self, dispatch: Dispatch) -> &mut Self {
        self.dispatch = dispatch;
        self
    }

    /// Fail with [`SmlzError::TooLarge`] if the compressed data, including the
    /// termination code, would be longer than `size` bytes.
    #[inline]
    pub fn max_compressed_size(&mut self, size: usize) -> &mut Self {
        self.limit = Some(size);
        self
    }

    /// Write debugging and diagnostic information to `log` while the input is
    /// being encoded.
    #[inline]
    pub fn with_logging<L: Write>(&mut self, log: &'a mut L) -> &mut Self {
        let log = Some(log as &'a mut dyn Write);
        self.log = log;
        self
    }

    /// Start the encoding and write the compressed data out to `wtr`
    #[inline]
    pub fn encode_to_writer<W: Write>(&mut self, wtr: W) -> Result<(), SmlzError> {
        do_encode(self, wtr)
    }

    /// Start the encoding and write the compressed data out to the newly created
    /// `File` `f`
    #[inline]
    pub fn encode_to_file<P: AsRef<Path>>(&mut self, f: P) -> Result<(), SmlzError> {
        let mut wtr = BufWriter::new(File::create(f)?);
        self.encode_to_writer(&mut wtr)?;
        wtr.flush().map_err(Into::into)
    }

    /// Start the encoding and return the compressed data in a `Vec<u8>`.
    #[inline]
    pub fn encode_to_vec(&mut self) -> Result<Vec<u8>, SmlzError> {
        let data = Vec::new();
        let mut csr = Cursor::new(data);
        self.encode_to_writer(&mut csr).map(|_| csr.into_inner())
    }
}

impl<'a> EncoderBuilder<'a, BufReader<File>> {
    /// Create a new `EncoderBuilder` for the file at `p`.
    #[inline]
    pub fn for_file<P: AsRef<Path>>(p: P) -> Result<Self, SmlzError> {
        let rdr = BufReader::new(File::open(p)?);
        Ok(Self::for_reader(rdr))
    }
}

impl<'a> EncoderBuilder<'a, Cursor<&'a [u8]>> {
    /// Create a new `EncoderBuilder` for the data the `bytes` slice.
    #[inline]
    pub fn for_bytes(bytes: &'a [u8]) -> Self {
        let rdr = Cursor::new(bytes);
        Self::for_reader(rdr)
    }
}

/// Compress data into a `Vec<u8>`
///
/// This is a convenience function to encode a `Read`er without having to
/// import and set up an [`EncoderBuilder`].
pub fn encode<R: Read>(rdr: R) -> Result<Vec<u8>, SmlzError> {
    EncoderBuilder::for_reader(rdr).encode_to_vec()
}

fn do_encode<R: Read, W: Write>(
    opts: &mut EncoderBuilder<'_, R>,
    wtr: W,
) -> Result<(), SmlzError> {
    let EncoderBuilder {
        rdr,
        depth,
        dispatch,
        limit,
        log,
    } = opts;

    let mut input = Vec::new();
    rdr.read_to_end(&mut input)?;

    let plan = compress(&input, *depth, *dispatch);
    let size = plan.iter().map(Instruction::encoded_size).sum::<usize>() + 1;

    if let Some(wtr) = log.as_mut() {
        let mut position = 0;
        for instruction in &plan {
            writeln!(wtr, "{:04x} - {}", position, instruction)?;
            position += instruction.length;
        }
        writeln!(wtr, "{} bytes compressed to {} bytes", input.len(), size)?;
    }

    if let Some(limit) = *limit {
        if size > limit {
            return Err(SmlzError::TooLarge { size, limit });
        }
    }

    write_stream(wtr, &plan)
}

/// Build the list of instructions that reproduce `src`.
///
/// At each position, every finder is tried and the longest candidate is used.
/// Bytes that no finder can cover are collected into Direct Copy runs.
pub(crate) fn compress(src: &[u8], depth: SearchDepth, dispatch: Dispatch) -> Vec<Instruction> {
    let mut plan = Vec::new();
    // start of the pending Direct Copy run, which ends at `csr`
    let mut literal = 0;
    let mut csr = 0;

    while csr < src.len() {
        if csr - literal == MAX_RUN {
            plan.push(Instruction::literal(&src[literal..csr]));
            literal = csr;
        }

        let found = find_candidates(src, csr, depth, dispatch);
        match pick_best(&found) {
            Some(best) => {
                if literal < csr {
                    plan.push(Instruction::literal(&src[literal..csr]));
                }
                plan.push(best.into());
                csr += best.length;
                literal = csr;
            }
            None => csr += 1,
        }
    }

    if literal < csr {
        plan.push(Instruction::literal(&src[literal..csr]));
    }

    plan
}

/// Run every finder at `csr`, returning their candidates in finder order
fn find_candidates(
    src: &[u8],
    csr: usize,
    depth: SearchDepth,
    dispatch: Dispatch,
) -> [Candidate<'_>; 5] {
    let mut found = [Candidate::default(); 5];

    match dispatch {
        Dispatch::Parallel => rayon::scope(|s| {
            for (slot, &finder) in found.iter_mut().zip(FINDERS.iter()) {
                s.spawn(move |_| *slot = finder.find(src, csr, depth));
            }
        }),
        Dispatch::Sequential => {
            for (slot, finder) in found.iter_mut().zip(FINDERS.iter()) {
                *slot = finder.find(src, csr, depth);
            }
        }
    }

    found
}

/// The longest candidate, or the first one found if several are the same length
fn pick_best<'c, 'a>(found: &'c [Candidate<'a>]) -> Option<&'c Candidate<'a>> {
    found
        .iter()
        .filter(|c| !c.is_empty())
        .fold(None, |best, c| match best {
            Some(b) if b.length >= c.length => Some(b),
            _ => Some(c),
        })
}

fn write_stream<W: Write>(wtr: W, plan: &[Instruction]) -> Result<(), SmlzError> {
    let mut out = BitWriter::endian(wtr, BigEndian);

    for instruction in plan {
        instruction.write(&mut out)?;
    }

    out.write(8, TERMINATOR)?;
    out.byte_align()?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{Command, Operand};

    fn commands(plan: &[Instruction]) -> Vec<(Command, usize)> {
        plan.iter().map(|i| (i.command, i.length)).collect()
    }

    #[test]
    fn empty_input() {
        assert!(compress(&[], SearchDepth::Exhaustive, Dispatch::Sequential).is_empty());
        assert_eq!(encode(std::io::empty()).unwrap(), [TERMINATOR]);
    }

    #[test]
    fn byte_fill_wins_ties() {
        let src = [0x10; 4];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Parallel);
        assert_eq!(commands(&plan), [(Command::ByteFill, 4)]);
        assert_eq!(encode(&src[..]).unwrap(), [0x23, 0x10, 0xFF]);
    }

    #[test]
    fn sigma_fill() {
        let src = [0x05, 0x06, 0x07];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Sequential);
        assert_eq!(plan[0].operand, Operand::Byte(0x05));
        assert_eq!(commands(&plan), [(Command::SigmaFill, 3)]);
        assert_eq!(encode(&src[..]).unwrap(), [0x62, 0x05, 0xFF]);
    }

    #[test]
    fn literals_flush_before_matches() {
        let src = [0x01, 0x09, 0x02, 0x02, 0x02, 0x33];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Sequential);
        assert_eq!(
            commands(&plan),
            [
                (Command::DirectCopy, 2),
                (Command::ByteFill, 3),
                (Command::DirectCopy, 1)
            ]
        );
        assert_eq!(
            encode(&src[..]).unwrap(),
            [0x01, 0x01, 0x09, 0x22, 0x02, 0x00, 0x33, 0xFF]
        );
    }

    #[test]
    fn copies() {
        let src = [0x10, 0x20, 0x30, 0x99, 0x10, 0x20, 0x30, 0x40];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Sequential);
        assert_eq!(plan[1].operand, Operand::Address(0));
        assert_eq!(
            commands(&plan),
            [
                (Command::DirectCopy, 4),
                (Command::LibraryCopy, 3),
                (Command::DirectCopy, 1)
            ]
        );

        let src = [0x10, 0x20, 0x99, 0x10, 0x20, 0x40];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Sequential);
        assert_eq!(plan[1].operand, Operand::Byte(3));
        assert_eq!(
            commands(&plan),
            [
                (Command::DirectCopy, 3),
                (Command::MinusCopy, 2),
                (Command::DirectCopy, 1)
            ]
        );

        let src = [0x00, 0x0F, 0xF0, 0x33, 0xFF, 0xF0, 0x0F, 0x44];
        let plan = compress(&src, SearchDepth::Exhaustive, Dispatch::Sequential);
        assert_eq!(plan[1].operand, Operand::Address(0));
        assert_eq!(
            commands(&plan),
            [
                (Command::DirectCopy, 4),
                (Command::XorCopy, 3),
                (Command::DirectCopy, 1)
            ]
        );
    }

    #[test]
    fn parallel_matches_sequential() {
        let src: Vec<u8> = b"ABBACABBACD sam I am I am sam"
            .iter()
            .chain(&[0u8; 40])
            .chain(b"ABBACABBACD")
            .copied()
            .collect();

        for &depth in &[SearchDepth::Exhaustive, SearchDepth::Nearest] {
            assert_eq!(
                compress(&src, depth, Dispatch::Parallel),
                compress(&src, depth, Dispatch::Sequential)
            );
        }
    }

    #[test]
    fn size_limit() {
        let src = [0x10; 4];
        let ok = EncoderBuilder::for_bytes(&src)
            .max_compressed_size(3)
            .encode_to_vec();
        assert_eq!(ok.unwrap(), [0x23, 0x10, 0xFF]);

        match EncoderBuilder::for_bytes(&src)
            .max_compressed_size(2)
            .encode_to_vec()
        {
            Err(SmlzError::TooLarge { size: 3, limit: 2 }) => {}
            other => panic!("expected size error, got {:?}", other),
        }
    }

    #[test]
    fn logging() {
        let mut log = Vec::new();
        EncoderBuilder::for_bytes(&[0x10; 4])
            .with_logging(&mut log)
            .encode_to_vec()
            .unwrap();

        let log = String::from_utf8(log).unwrap();
        assert!(log.contains("0000 - Byte Fill x4 [10]"), "{}", log);
        assert!(log.contains("4 bytes compressed to 3 bytes"), "{}", log);
    }
}
