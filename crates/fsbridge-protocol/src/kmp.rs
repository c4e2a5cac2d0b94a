//! Knuth-Morris-Pratt substring search.
//!
//! [`Pattern`] precomputes the failure function of a byte pattern once and can
//! then be used either for one-shot searches over a slice or incrementally, one
//! byte at a time, via [`Pattern::advance`]. The incremental form is what the
//! boundary reader uses to follow a match across buffer refills.

/// A non-empty byte pattern together with its failure table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    failure: Vec<usize>,
}

impl Pattern {
    /// Build a pattern. Returns `None` for an empty pattern.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return None;
        }
        let failure = failure_table(&bytes);
        Some(Self { bytes, failure })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `failure()[i]` is the length of the longest proper prefix of
    /// `pattern[..=i]` that is also a suffix of it.
    pub fn failure(&self) -> &[usize] {
        &self.failure
    }

    /// Feed one byte into a running match.
    ///
    /// `matched` is the number of pattern bytes matched so far (a full match,
    /// `matched == len()`, is allowed and continues with overlapping
    /// occurrences). Returns the new match length.
    pub fn advance(&self, matched: usize, byte: u8) -> usize {
        let mut k = matched;
        if k == self.bytes.len() {
            k = self.failure[k - 1];
        }
        loop {
            if self.bytes[k] == byte {
                return k + 1;
            }
            if k == 0 {
                return 0;
            }
            k = self.failure[k - 1];
        }
    }

    /// Offset of the first occurrence of the pattern in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        let mut matched = 0;
        for (i, &byte) in haystack.iter().enumerate() {
            matched = self.advance(matched, byte);
            if matched == self.bytes.len() {
                return Some(i + 1 - matched);
            }
        }
        None
    }

    /// Offsets of every occurrence, overlapping ones included.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        let mut found = Vec::new();
        let mut matched = 0;
        for (i, &byte) in haystack.iter().enumerate() {
            matched = self.advance(matched, byte);
            if matched == self.bytes.len() {
                found.push(i + 1 - matched);
            }
        }
        found
    }
}

fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(Pattern::new(Vec::new()).is_none());
    }

    #[test]
    fn test_failure_table() {
        let p = Pattern::new("ABABAC").unwrap();
        assert_eq!(p.failure(), &[0, 0, 1, 2, 3, 0]);

        let p = Pattern::new("AAAA").unwrap();
        assert_eq!(p.failure(), &[0, 1, 2, 3]);

        let p = Pattern::new("XYZZY").unwrap();
        assert_eq!(p.failure(), &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_find_basic() {
        let p = Pattern::new("needle").unwrap();
        assert_eq!(p.find(b"haystack with a needle in it"), Some(16));
        assert_eq!(p.find(b"no match here"), None);
        assert_eq!(p.find(b"needl"), None);
    }

    #[test]
    fn test_find_requires_fallback() {
        // A reset-to-zero matcher misses this: after "ABABA" the mismatching
        // 'B' must fall back to "ABA", not to the start.
        let p = Pattern::new("ABABAC").unwrap();
        assert_eq!(p.find(b"ABABABAC"), Some(2));

        let p = Pattern::new("AAB").unwrap();
        assert_eq!(p.find(b"AAAB"), Some(1));
    }

    #[test]
    fn test_find_all_overlapping() {
        let p = Pattern::new("AA").unwrap();
        assert_eq!(p.find_all(b"AAAA"), vec![0, 1, 2]);

        let p = Pattern::new("ABA").unwrap();
        assert_eq!(p.find_all(b"ABABABA"), vec![0, 2, 4]);
    }

    #[test]
    fn test_advance_matches_find() {
        let p = Pattern::new("0110").unwrap();
        let haystack = b"01011010110";
        let mut matched = 0;
        let mut hit = None;
        for (i, &b) in haystack.iter().enumerate() {
            matched = p.advance(matched, b);
            if matched == p.len() {
                hit = Some(i + 1 - p.len());
                break;
            }
        }
        assert_eq!(hit, p.find(haystack));
        assert_eq!(hit, Some(2));
    }
}
