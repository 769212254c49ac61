//! Platform/device selection from 1-based user input.

use crate::error::{Result, SomGpuError};
use std::io::{BufRead, Write};

/// Validates a 1-based ordinal against `count` candidates and returns the
/// 0-based index.
pub fn check_ordinal(kind: &'static str, ordinal: i64, count: usize) -> Result<usize> {
    if ordinal < 1 || ordinal as u64 > count as u64 {
        return Err(SomGpuError::InvalidSelection {
            kind,
            input: ordinal.to_string(),
            count,
        });
    }
    Ok((ordinal - 1) as usize)
}

/// Parses raw user input as a 1-based choice among `candidates`.
///
/// Returns the 0-based index of the chosen candidate.
pub fn select_index<T>(kind: &'static str, candidates: &[T], raw: &str) -> Result<usize> {
    let trimmed = raw.trim();
    let ordinal = trimmed
        .parse::<i64>()
        .map_err(|_| SomGpuError::InvalidSelection {
            kind,
            input: trimmed.to_string(),
            count: candidates.len(),
        })?;
    check_ordinal(kind, ordinal, candidates.len())
}

/// Reads whitespace-separated answers from an input stream, the way a
/// terminal user types them.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    pending: Vec<String>,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    /// Creates a prompter over the given streams.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            pending: Vec::new(),
        }
    }

    /// Prints `(n) : label` lines for each candidate, 1-based.
    pub fn list<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        for (i, label) in labels.iter().enumerate() {
            writeln!(self.output, "\t ({}) : {}", i + 1, label.as_ref())?;
        }
        Ok(())
    }

    /// Asks for one of `candidates` and returns its 0-based index.
    pub fn choose<T>(&mut self, kind: &'static str, candidates: &[T]) -> Result<usize> {
        write!(self.output, "Select a {}. (1, 2, ...) :\t", kind)?;
        self.output.flush()?;
        let answer = self.next_token()?.unwrap_or_default();
        select_index(kind, candidates, &answer)
    }

    fn next_token(&mut self) -> Result<Option<String>> {
        while self.pending.is_empty() {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.pending = line.split_whitespace().rev().map(str::to_string).collect();
        }
        Ok(self.pending.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_select_index_bounds() {
        let candidates = ["a", "b", "c"];
        assert_eq!(select_index("platform", &candidates, "1").unwrap(), 0);
        assert_eq!(select_index("platform", &candidates, " 3\n").unwrap(), 2);

        for raw in ["0", "4", "-1", "", "two", "1.5"] {
            assert!(
                matches!(
                    select_index("platform", &candidates, raw),
                    Err(SomGpuError::InvalidSelection { count: 3, .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_select_index_no_candidates() {
        let none: [u8; 0] = [];
        assert!(select_index("device", &none, "1").is_err());
    }

    #[test]
    fn test_check_ordinal() {
        assert_eq!(check_ordinal("device", 2, 2).unwrap(), 1);
        assert!(check_ordinal("device", 0, 2).is_err());
        assert!(check_ordinal("device", 3, 2).is_err());
        assert!(check_ordinal("device", i64::MIN, 2).is_err());
    }

    #[test]
    fn test_prompter_reads_both_answers_from_one_line() {
        let mut out = Vec::new();
        let mut prompter = Prompter::new(Cursor::new("2 1\n"), &mut out);

        assert_eq!(prompter.choose("platform", &["x", "y"]).unwrap(), 1);
        assert_eq!(prompter.choose("device", &["z"]).unwrap(), 0);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Select a platform."));
        assert!(text.contains("Select a device."));
    }

    #[test]
    fn test_prompter_skips_blank_lines() {
        let mut prompter = Prompter::new(Cursor::new("\n\n  1\n"), Vec::new());
        assert_eq!(prompter.choose("platform", &["x"]).unwrap(), 0);
    }

    #[test]
    fn test_prompter_eof_is_invalid() {
        let mut prompter = Prompter::new(Cursor::new(""), Vec::new());
        assert!(matches!(
            prompter.choose("platform", &["x"]),
            Err(SomGpuError::InvalidSelection { .. })
        ));
    }

    #[test]
    fn test_prompter_list() {
        let mut out = Vec::new();
        Prompter::new(Cursor::new(""), &mut out)
            .list(&["Vulkan", "OpenGL"])
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\t (1) : Vulkan\n\t (2) : OpenGL\n"
        );
    }
}
