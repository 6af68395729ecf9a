//! Run-length codec for grid rows.
//!
//! A row is a sequence of tokens: one dependency character optionally
//! followed by a decimal repeat count (`p5` is five placeholders). Runs of
//! three or more identical characters are written with a count, except for
//! the diagonal `o`; rows of three cells or fewer are stored literally.

use crate::DependencyChar;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RleError {
    #[error("repeat count at offset {offset} has no character before it")]
    DanglingCount { offset: usize },

    #[error("zero repeat count at offset {offset}")]
    ZeroCount { offset: usize },

    #[error("unknown character '{ch}' at offset {offset}")]
    UnknownChar { ch: char, offset: usize },

    #[error("repeat count at offset {offset} is too large")]
    CountOverflow { offset: usize },

    #[error("index {index} is out of range for a row of {len} cells")]
    OutOfRange { index: usize, len: usize },

    #[error("row has {actual} cells, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

const MIN_RUN: usize = 3;

/// Encode a row.
pub fn compress(cells: &[DependencyChar]) -> String {
    let mut out = String::with_capacity(cells.len());
    if cells.len() <= MIN_RUN {
        out.extend(cells.iter().map(|c| c.as_char()));
        return out;
    }

    let mut i = 0;
    while i < cells.len() {
        let ch = cells[i];
        let run = cells[i..].iter().take_while(|&&c| c == ch).count();
        if run >= MIN_RUN && ch != DependencyChar::Diagonal {
            out.push(ch.as_char());
            out.push_str(&run.to_string());
        } else {
            out.extend(std::iter::repeat(ch.as_char()).take(run));
        }
        i += run;
    }
    out
}

/// Decode a row in full. The output holds every declared cell, so rows
/// from untrusted input go through [`decompress_exact`] instead.
pub fn decompress(row: &str) -> Result<Vec<DependencyChar>, RleError> {
    let mut out = Vec::with_capacity(row.len());
    for run in Runs::new(row) {
        let (ch, count) = run?;
        out.extend(std::iter::repeat(ch).take(count));
    }
    Ok(out)
}

/// Decode a row that must hold exactly `expected` cells. The length is
/// checked before any cell is materialized.
pub fn decompress_exact(row: &str, expected: usize) -> Result<Vec<DependencyChar>, RleError> {
    let actual = decoded_len(row)?;
    if actual != expected {
        return Err(RleError::LengthMismatch { expected, actual });
    }
    decompress(row)
}

/// Cell at `index`, decoding only the runs before it.
pub fn get_char_at(row: &str, index: usize) -> Result<DependencyChar, RleError> {
    let mut runs = Runs::new(row);
    let mut seen = 0usize;
    loop {
        let offset = runs.offset;
        let Some(run) = runs.next() else {
            return Err(RleError::OutOfRange { index, len: seen });
        };
        let (ch, count) = run?;
        seen = seen
            .checked_add(count)
            .ok_or(RleError::CountOverflow { offset })?;
        if index < seen {
            return Ok(ch);
        }
    }
}

/// Number of cells the row decodes to.
pub fn decoded_len(row: &str) -> Result<usize, RleError> {
    let mut runs = Runs::new(row);
    let mut total = 0usize;
    loop {
        let offset = runs.offset;
        let Some(run) = runs.next() else {
            return Ok(total);
        };
        let (_, count) = run?;
        total = total
            .checked_add(count)
            .ok_or(RleError::CountOverflow { offset })?;
    }
}

/// Replace the cell at `index` and re-encode.
pub fn set_char_at(row: &str, index: usize, ch: DependencyChar) -> Result<String, RleError> {
    let mut cells = decompress(row)?;
    let len = cells.len();
    let cell = cells
        .get_mut(index)
        .ok_or(RleError::OutOfRange { index, len })?;
    *cell = ch;
    Ok(compress(&cells))
}

/// Iterator over `(character, count)` runs of an encoded row.
#[derive(Debug, Clone)]
pub struct Runs<'a> {
    row: &'a str,
    offset: usize,
    failed: bool,
}

impl<'a> Runs<'a> {
    pub fn new(row: &'a str) -> Self {
        Self {
            row,
            offset: 0,
            failed: false,
        }
    }

    fn parse_count(&mut self) -> Result<Option<usize>, RleError> {
        let start = self.offset;
        let digits = self.row[start..]
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return Ok(None);
        }
        self.offset += digits;

        let mut count = 0usize;
        for b in self.row[start..start + digits].bytes() {
            count = count
                .checked_mul(10)
                .and_then(|c| c.checked_add(usize::from(b - b'0')))
                .ok_or(RleError::CountOverflow { offset: start })?;
        }
        if count == 0 {
            return Err(RleError::ZeroCount { offset: start });
        }
        Ok(Some(count))
    }

    fn next_run(&mut self, c: char) -> Result<(DependencyChar, usize), RleError> {
        let start = self.offset;
        if c.is_ascii_digit() {
            return Err(RleError::DanglingCount { offset: start });
        }
        let ch = DependencyChar::try_from(c)
            .map_err(|_| RleError::UnknownChar { ch: c, offset: start })?;
        self.offset += c.len_utf8();
        let count = self.parse_count()?.unwrap_or(1);
        Ok((ch, count))
    }
}

impl Iterator for Runs<'_> {
    type Item = Result<(DependencyChar, usize), RleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let c = self.row[self.offset..].chars().next()?;
        let run = self.next_run(c);
        self.failed = run.is_err();
        Some(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(s: &str) -> Vec<DependencyChar> {
        s.chars().map(|c| DependencyChar::try_from(c).unwrap()).collect()
    }

    #[test]
    fn compresses_long_runs_only() {
        assert_eq!(compress(&cells("nnnnnpppdd")), "n5p3dd");
        assert_eq!(compress(&cells("pppppppp")), "p8");
        assert_eq!(compress(&cells("ppp")), "ppp");
        assert_eq!(compress(&cells("oooopp")), "oooopp");
        assert_eq!(compress(&[]), "");
    }

    #[test]
    fn decompresses_mixed_tokens() {
        assert_eq!(decompress("n5p3dd").unwrap(), cells("nnnnnpppdd"));
        assert_eq!(decompress("p12o").unwrap().len(), 13);
        assert_eq!(decompress("").unwrap(), Vec::new());
    }

    #[test]
    fn round_trips() {
        for row in ["o", "op", "po", "<p>x", "ppppo....", "xxxx<<<<>>>>SSSSsssdddnnnppp.ooo"] {
            let decoded = cells(row);
            assert_eq!(decompress(&compress(&decoded)).unwrap(), decoded, "{row}");
        }
    }

    #[test]
    fn rejects_malformed_rows() {
        assert_eq!(decompress("5p"), Err(RleError::DanglingCount { offset: 0 }));
        assert_eq!(decompress("p0"), Err(RleError::ZeroCount { offset: 1 }));
        assert_eq!(
            decompress("pq"),
            Err(RleError::UnknownChar { ch: 'q', offset: 1 })
        );
        assert!(matches!(
            decompress("p99999999999999999999999"),
            Err(RleError::CountOverflow { .. })
        ));
    }

    #[test]
    fn random_access_matches_full_decode() {
        let row = "p5o<3dd";
        let decoded = decompress(row).unwrap();
        for (i, expected) in decoded.iter().enumerate() {
            assert_eq!(get_char_at(row, i).unwrap(), *expected);
        }
        assert_eq!(
            get_char_at(row, decoded.len()),
            Err(RleError::OutOfRange { index: 11, len: 11 })
        );
        assert_eq!(decoded_len(row).unwrap(), 11);
    }

    #[test]
    fn lengths_are_checked_before_decoding() {
        assert_eq!(decoded_len("p99999999999999o").unwrap(), 100_000_000_000_000);
        assert_eq!(
            decompress_exact("p99999999999999o", 3),
            Err(RleError::LengthMismatch {
                expected: 3,
                actual: 100_000_000_000_000
            })
        );
        assert_eq!(decompress_exact("pop", 3).unwrap().len(), 3);
    }

    #[test]
    fn summed_counts_do_not_overflow() {
        let row = format!("p{}p5", usize::MAX);
        assert_eq!(decoded_len(&row), Err(RleError::CountOverflow { offset: row.len() - 2 }));
        assert_eq!(
            get_char_at(&row, usize::MAX),
            Err(RleError::CountOverflow { offset: row.len() - 2 })
        );
        assert_eq!(get_char_at(&row, 7).unwrap(), DependencyChar::Placeholder);
    }

    #[test]
    fn set_char_reencodes() {
        assert_eq!(set_char_at("op5", 3, DependencyChar::RowDependsOnColumn).unwrap(), "opp<pp");
        assert!(set_char_at("op5", 6, DependencyChar::Unset).is_err());
    }
}
