use serde::{Deserialize, Serialize};

/// Longest terminator pattern accepted.
pub const MAX_TERMINATOR_LEN: usize = 4;

/// Outcome of matching the bytes after a frame body against a set of
/// terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorMatch {
    /// The bytes cannot begin any terminator.
    NoMatch,
    /// The bytes are a proper prefix of some terminator; read more.
    NeedMore,
    /// A terminator of this length matched and no longer one can.
    Complete(usize),
    /// A terminator of this length matched, but a longer one might still.
    Extendable(usize),
}

/// A set of accepted frame terminators, matched longest first.
///
/// Every pattern is accepted on input; none is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u8>>", into = "Vec<Vec<u8>>")]
pub struct TerminatorSet {
    patterns: Vec<Vec<u8>>,
}

impl TerminatorSet {
    /// Build a set, rejecting empty or over-long patterns.
    pub fn new(patterns: Vec<Vec<u8>>) -> Result<Self, String> {
        if patterns.is_empty() {
            return Err("terminator set is empty".to_string());
        }
        for pattern in &patterns {
            if pattern.is_empty() || pattern.len() > MAX_TERMINATOR_LEN {
                return Err(format!(
                    "terminator {pattern:02X?} must be 1..={MAX_TERMINATOR_LEN} bytes"
                ));
            }
        }
        let mut patterns = patterns;
        patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        patterns.dedup();
        Ok(Self { patterns })
    }

    /// The ISCP terminators: EOF, CR, LF and their combinations.
    pub fn iscp_default() -> Self {
        Self {
            patterns: vec![
                vec![0x1A, 0x0D, 0x0A],
                vec![0x1A, 0x0D],
                vec![0x1A, 0x0A],
                vec![0x0D, 0x0A],
                vec![0x1A],
                vec![0x0D],
                vec![0x0A],
            ],
        }
    }

    pub fn patterns(&self) -> &[Vec<u8>] {
        &self.patterns
    }

    pub fn max_len(&self) -> usize {
        self.patterns.first().map_or(0, Vec::len)
    }

    /// Whether `byte` can start a terminator.
    pub fn starts_with_byte(&self, byte: u8) -> bool {
        self.patterns.iter().any(|p| p[0] == byte)
    }

    /// Whether `tail` is exactly one of the patterns.
    pub fn contains(&self, tail: &[u8]) -> bool {
        self.patterns.iter().any(|p| p == tail)
    }

    /// Match the bytes that follow a frame body.
    pub fn probe(&self, tail: &[u8]) -> TerminatorMatch {
        let matched = self
            .patterns
            .iter()
            .filter(|p| tail.starts_with(p))
            .map(Vec::len)
            .max();
        let longer_possible = self
            .patterns
            .iter()
            .any(|p| p.len() > tail.len() && p.starts_with(tail));

        match (matched, longer_possible) {
            (Some(len), true) => TerminatorMatch::Extendable(len),
            (Some(len), false) => TerminatorMatch::Complete(len),
            (None, true) => TerminatorMatch::NeedMore,
            (None, false) => TerminatorMatch::NoMatch,
        }
    }
}

impl Default for TerminatorSet {
    fn default() -> Self {
        Self::iscp_default()
    }
}

impl TryFrom<Vec<Vec<u8>>> for TerminatorSet {
    type Error = String;

    fn try_from(value: Vec<Vec<u8>>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TerminatorSet> for Vec<Vec<u8>> {
    fn from(value: TerminatorSet) -> Self {
        value.patterns
    }
}
