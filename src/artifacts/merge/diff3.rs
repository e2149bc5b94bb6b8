//! Three-way line merge
//!
//! Both sides are diffed against the ancestor with Myers' algorithm. Walking the three
//! sequences in lockstep, stretches where all three agree become clean chunks; between two
//! such stretches the divergent region is clean when only one side changed it and a conflict
//! when both did.
//!
//! Line numbers inside the walk are 1-based: `line_*` counts the lines already consumed and the
//! match maps take an ancestor line number to the matching line number on one side.

use crate::artifacts::diff::myers::MyersDiff;
use std::collections::HashMap;

pub const MARKER_BASELINE: &str = "<<<<<<< baseline";
pub const MARKER_ANCESTOR: &str = "||||||| ancestor";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_OTHER: &str = ">>>>>>> other";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<'a> {
    Clean(Vec<&'a [u8]>),
    Conflict {
        ancestor: Vec<&'a [u8]>,
        baseline: Vec<&'a [u8]>,
        other: Vec<&'a [u8]>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff3Result<'a> {
    chunks: Vec<Chunk<'a>>,
}

impl Diff3Result<'_> {
    pub fn is_clean(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| matches!(chunk, Chunk::Clean(_)))
    }

    pub fn conflicts(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| matches!(chunk, Chunk::Conflict { .. }))
            .count()
    }

    /// Merged content with conflict markers around every divergent region
    pub fn with_markers(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for chunk in &self.chunks {
            match chunk {
                Chunk::Clean(lines) => lines.iter().for_each(|line| out.extend_from_slice(line)),
                Chunk::Conflict {
                    ancestor,
                    baseline,
                    other,
                } => {
                    write_marker(&mut out, MARKER_BASELINE);
                    write_lines(&mut out, baseline);
                    write_marker(&mut out, MARKER_ANCESTOR);
                    write_lines(&mut out, ancestor);
                    write_marker(&mut out, MARKER_SEPARATOR);
                    write_lines(&mut out, other);
                    write_marker(&mut out, MARKER_OTHER);
                }
            }
        }

        out
    }

    /// Merged content keeping both sides of every divergent region, baseline first
    pub fn union(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for chunk in &self.chunks {
            match chunk {
                Chunk::Clean(lines) => lines.iter().for_each(|line| out.extend_from_slice(line)),
                Chunk::Conflict {
                    baseline, other, ..
                } => {
                    write_lines(&mut out, baseline);
                    write_lines(&mut out, other);
                }
            }
        }

        out
    }
}

fn write_marker(out: &mut Vec<u8>, marker: &str) {
    out.extend_from_slice(marker.as_bytes());
    out.push(b'\n');
}

/// Lines inside a conflict region always end with a newline so markers start a line
fn write_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            out.push(b'\n');
        }
    }
}

pub fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    content.split_inclusive(|byte| *byte == b'\n').collect()
}

/// Merge `baseline` and `other`, both derived from `ancestor`
pub fn merge<'a>(ancestor: &'a [u8], baseline: &'a [u8], other: &'a [u8]) -> Diff3Result<'a> {
    Diff3::new(
        split_lines(ancestor),
        split_lines(baseline),
        split_lines(other),
    )
    .run()
}

struct Diff3<'a> {
    o: Vec<&'a [u8]>,
    a: Vec<&'a [u8]>,
    b: Vec<&'a [u8]>,
    match_a: HashMap<usize, usize>,
    match_b: HashMap<usize, usize>,
    line_o: usize,
    line_a: usize,
    line_b: usize,
    chunks: Vec<Chunk<'a>>,
}

fn match_map(o: &[&[u8]], side: &[&[u8]]) -> HashMap<usize, usize> {
    MyersDiff::new(o, side)
        .matches()
        .into_iter()
        .map(|(i, j)| (i + 1, j + 1))
        .collect()
}

impl<'a> Diff3<'a> {
    fn new(o: Vec<&'a [u8]>, a: Vec<&'a [u8]>, b: Vec<&'a [u8]>) -> Self {
        Diff3 {
            match_a: match_map(&o, &a),
            match_b: match_map(&o, &b),
            o,
            a,
            b,
            line_o: 0,
            line_a: 0,
            line_b: 0,
            chunks: Vec::new(),
        }
    }

    fn run(mut self) -> Diff3Result<'a> {
        loop {
            match self.next_mismatch() {
                Some(1) => match self.next_match() {
                    (o, Some(a), Some(b)) => self.emit_chunk(o, a, b),
                    _ => {
                        self.emit_final_chunk();
                        break;
                    }
                },
                Some(i) => self.emit_chunk(self.line_o + i, self.line_a + i, self.line_b + i),
                None => {
                    self.emit_final_chunk();
                    break;
                }
            }
        }

        Diff3Result {
            chunks: self.chunks,
        }
    }

    fn in_bounds(&self, i: usize) -> bool {
        self.line_o + i <= self.o.len()
            || self.line_a + i <= self.a.len()
            || self.line_b + i <= self.b.len()
    }

    fn is_match(matches: &HashMap<usize, usize>, line_o: usize, offset: usize, i: usize) -> bool {
        matches.get(&(line_o + i)) == Some(&(offset + i))
    }

    /// Offset of the first line where the sides stop agreeing, `None` once everything is consumed
    fn next_mismatch(&self) -> Option<usize> {
        let mut i = 1;
        while self.in_bounds(i)
            && Self::is_match(&self.match_a, self.line_o, self.line_a, i)
            && Self::is_match(&self.match_b, self.line_o, self.line_b, i)
        {
            i += 1;
        }

        self.in_bounds(i).then_some(i)
    }

    /// Next ancestor line matched on both sides
    fn next_match(&self) -> (usize, Option<usize>, Option<usize>) {
        let mut o = self.line_o + 1;
        while o <= self.o.len() && !(self.match_a.contains_key(&o) && self.match_b.contains_key(&o))
        {
            o += 1;
        }

        (o, self.match_a.get(&o).copied(), self.match_b.get(&o).copied())
    }

    fn emit_chunk(&mut self, o: usize, a: usize, b: usize) {
        let chunk = Self::chunk(
            self.o[self.line_o..o - 1].to_vec(),
            self.a[self.line_a..a - 1].to_vec(),
            self.b[self.line_b..b - 1].to_vec(),
        );
        self.chunks.push(chunk);
        (self.line_o, self.line_a, self.line_b) = (o - 1, a - 1, b - 1);
    }

    fn emit_final_chunk(&mut self) {
        let chunk = Self::chunk(
            self.o[self.line_o..].to_vec(),
            self.a[self.line_a..].to_vec(),
            self.b[self.line_b..].to_vec(),
        );
        self.chunks.push(chunk);
    }

    fn chunk(o: Vec<&'a [u8]>, a: Vec<&'a [u8]>, b: Vec<&'a [u8]>) -> Chunk<'a> {
        if a == o || a == b {
            Chunk::Clean(b)
        } else if b == o {
            Chunk::Clean(a)
        } else {
            Chunk::Conflict {
                ancestor: o,
                baseline: a,
                other: b,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    fn one_sided_edits_are_taken() {
        let ancestor = b"alpha\nbeta\ngamma\n";
        let baseline = b"alpha\nBETA\ngamma\n";
        let other = b"alpha\nbeta\ngamma\ndelta\n";

        let result = merge(ancestor, baseline, other);

        assert!(result.is_clean());
        assert_eq!(
            String::from_utf8(result.with_markers()).unwrap(),
            "alpha\nBETA\ngamma\ndelta\n"
        );
    }

    #[rstest]
    fn overlapping_edits_get_markers() {
        let ancestor = b"one\ntwo\nthree\n";
        let baseline = b"one\nTWO\nthree\n";
        let other = b"one\n2\nthree\n";

        let result = merge(ancestor, baseline, other);

        assert_eq!(
            String::from_utf8(result.with_markers()).unwrap(),
            "one\n<<<<<<< baseline\nTWO\n||||||| ancestor\ntwo\n=======\n2\n>>>>>>> other\nthree\n"
        );
        assert_eq!(
            String::from_utf8(result.union()).unwrap(),
            "one\nTWO\n2\nthree\n"
        );
    }

    #[rstest]
    fn additions_from_an_empty_ancestor_conflict_unless_identical() {
        let same = merge(b"", b"hello\n", b"hello\n");
        let different = merge(b"", b"hello\n", b"world\n");

        assert!(same.is_clean());
        assert_eq!(same.with_markers(), b"hello\n".to_vec());
        assert!(!different.is_clean());
    }

    #[rstest]
    fn missing_final_newline_does_not_glue_markers() {
        let result = merge(b"a\n", b"b", b"c");

        assert_eq!(
            String::from_utf8(result.with_markers()).unwrap(),
            "<<<<<<< baseline\nb\n||||||| ancestor\na\n=======\nc\n>>>>>>> other\n"
        );
    }
}
