use std::ops::Range;

use crate::format::{Command, Instruction, Operand, MAX_RUN};

/// Largest address a Library Copy or XOR Copy can hold
const ADDRESS_LIMIT: usize = u16::MAX as usize;
/// Farthest back a Minus Copy can reach
const MINUS_LIMIT: usize = u8::MAX as usize;

/// How hard the copy finders look for earlier matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchDepth {
    /// Try every earlier occurrence of the next byte and keep the longest match.
    /// Slow for large inputs, but gives the best compression.
    Exhaustive,
    /// Only try the closest earlier occurrence of the next byte.
    Nearest,
}

impl Default for SearchDepth {
    fn default() -> Self {
        Self::Exhaustive
    }
}

/// A run of the input that one command could produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate<'a> {
    pub command: Command,
    /// number of input bytes covered, or `0` if nothing was found
    pub length: usize,
    /// the covered input bytes
    pub sequence: &'a [u8],
    /// absolute address for Library and XOR copies, distance back for Minus Copy
    pub offset: usize,
}

impl<'a> Candidate<'a> {
    fn none(command: Command) -> Self {
        Self {
            command,
            length: 0,
            sequence: &[],
            offset: 0,
        }
    }

    fn new(command: Command, sequence: &'a [u8], offset: usize) -> Self {
        Self {
            command,
            length: sequence.len(),
            sequence,
            offset,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Default for Candidate<'_> {
    fn default() -> Self {
        Self::none(Command::DirectCopy)
    }
}

impl<'a> From<&Candidate<'a>> for Instruction<'a> {
    fn from(c: &Candidate<'a>) -> Self {
        use Command::*;

        let operand = match c.command {
            DirectCopy => Operand::Literal(c.sequence),
            ByteFill | SigmaFill => Operand::Byte(c.sequence[0]),
            WordFill => Operand::Word([c.sequence[0], c.sequence[1]]),
            LibraryCopy | XorCopy => Operand::Address(c.offset as u16),
            MinusCopy => Operand::Byte(c.offset as u8),
        };

        Self {
            command: c.command,
            length: c.length,
            operand,
        }
    }
}

/// A strategy for finding a compressible run at the start of `src[csr..]`.
///
/// Finders only read `src`, so they can all run at the same time.
pub(crate) trait MatchFinder: Sync {
    fn find<'a>(&self, src: &'a [u8], csr: usize, depth: SearchDepth) -> Candidate<'a>;
}

/// Every finder, in the order used to break ties between equal length candidates
pub(crate) const FINDERS: [&'static dyn MatchFinder; 5] =
    [&FillRun, &WordRun, &Library, &Inverted, &Nearby];

/// Byte Fill or Sigma Fill, depending on the byte after the cursor
#[derive(Debug, Clone, Copy)]
pub(crate) struct FillRun;
impl MatchFinder for FillRun {
    fn find<'a>(&self, src: &'a [u8], csr: usize, _: SearchDepth) -> Candidate<'a> {
        let ahead = &src[csr..];
        let (command, step) = match ahead {
            &[first, second, ..] if second == first => (Command::ByteFill, 0),
            &[first, second, ..] if second == first.wrapping_add(1) => (Command::SigmaFill, 1),
            _ => return Candidate::none(Command::ByteFill),
        };

        let length = 1 + ahead
            .windows(2)
            .take(MAX_RUN - 1)
            .take_while(|w| w[1] == w[0].wrapping_add(step))
            .count();

        Candidate::new(command, &ahead[..length], 0)
    }
}

/// Word Fill of the two bytes at the cursor
#[derive(Debug, Clone, Copy)]
pub(crate) struct WordRun;
impl WordRun {
    /// the word and at least one more full repeat
    const MIN_MATCH: usize = 4;
}
impl MatchFinder for WordRun {
    fn find<'a>(&self, src: &'a [u8], csr: usize, _: SearchDepth) -> Candidate<'a> {
        let ahead = &src[csr..];
        if ahead.len() < Self::MIN_MATCH {
            return Candidate::none(Command::WordFill);
        }

        let length = 2 + ahead
            .iter()
            .zip(&ahead[2..])
            .take(MAX_RUN - 2)
            .take_while(|(a, b)| a == b)
            .count();

        if length < Self::MIN_MATCH {
            Candidate::none(Command::WordFill)
        } else {
            Candidate::new(Command::WordFill, &ahead[..length], 0)
        }
    }
}

/// Library Copy from anywhere in the first 64 KiB of output
#[derive(Debug, Clone, Copy)]
pub(crate) struct Library;
impl MatchFinder for Library {
    fn find<'a>(&self, src: &'a [u8], csr: usize, depth: SearchDepth) -> Candidate<'a> {
        let window = 0..csr.min(ADDRESS_LIMIT + 1);
        back_reference(src, csr, window, 0x00, depth)
            .filter(|&(_, length)| length >= 3)
            .map(|(idx, length)| Candidate::new(Command::LibraryCopy, &src[csr..csr + length], idx))
            .unwrap_or_else(|| Candidate::none(Command::LibraryCopy))
    }
}

/// XOR Copy from the inverted bytes anywhere in the first 64 KiB of output
#[derive(Debug, Clone, Copy)]
pub(crate) struct Inverted;
impl MatchFinder for Inverted {
    fn find<'a>(&self, src: &'a [u8], csr: usize, depth: SearchDepth) -> Candidate<'a> {
        let window = 0..csr.min(ADDRESS_LIMIT + 1);
        back_reference(src, csr, window, 0xFF, depth)
            .filter(|&(_, length)| length >= 3)
            .map(|(idx, length)| Candidate::new(Command::XorCopy, &src[csr..csr + length], idx))
            .unwrap_or_else(|| Candidate::none(Command::XorCopy))
    }
}

/// Minus Copy from the last 255 bytes of output
#[derive(Debug, Clone, Copy)]
pub(crate) struct Nearby;
impl MatchFinder for Nearby {
    fn find<'a>(&self, src: &'a [u8], csr: usize, depth: SearchDepth) -> Candidate<'a> {
        let window = csr.saturating_sub(MINUS_LIMIT)..csr;
        back_reference(src, csr, window, 0x00, depth)
            .filter(|&(_, length)| length >= 2)
            .map(|(idx, length)| {
                Candidate::new(Command::MinusCopy, &src[csr..csr + length], csr - idx)
            })
            .unwrap_or_else(|| Candidate::none(Command::MinusCopy))
    }
}

/// Find the longest earlier run that matches `src[csr..]` after each of its bytes
/// is XORed with `mask`. Only runs that start in `window` are checked, from the
/// closest to the farthest, so the closest of equally long matches wins.
///
/// A matched run can continue past `csr`, as the decoder will have written those
/// bytes by the time it copies them.
///
/// Returns the start of the match and its length.
fn back_reference(
    src: &[u8],
    csr: usize,
    window: Range<usize>,
    mask: u8,
    depth: SearchDepth,
) -> Option<(usize, usize)> {
    let ahead = &src[csr..];
    let limit = ahead.len().min(MAX_RUN);
    let first = *ahead.first()? ^ mask;
    let mut best: Option<(usize, usize)> = None;

    let starts = window.rev().filter(|&idx| src[idx] == first);
    for idx in starts {
        let length = src[idx..]
            .iter()
            .zip(ahead)
            .take(limit)
            .take_while(|&(&prev, &next)| prev == next ^ mask)
            .count();

        if best.map_or(true, |(_, longest)| length > longest) {
            best = Some((idx, length));
        }

        if length == limit || depth == SearchDepth::Nearest {
            break;
        }
    }

    best
}
