//! Incremental delimiter matching
//!
//! A delimiter may be split across two fragments, so matching is done one
//! character at a time with a KMP failure table. The number of characters
//! matched so far is the pending prefix; it survives between fragments and
//! only resolves once a later character completes or contradicts it.

/// Character-at-a-time matcher for one fixed delimiter
#[derive(Debug, Clone)]
pub(crate) struct DelimiterMatcher {
    pattern: Vec<char>,
    failure: Vec<usize>,
    matched: usize,
}

impl DelimiterMatcher {
    pub(crate) fn new(pattern: &str) -> Self {
        let pattern: Vec<char> = pattern.chars().collect();
        let mut failure = vec![0; pattern.len()];
        let mut k = 0;
        for i in 1..pattern.len() {
            while k > 0 && pattern[i] != pattern[k] {
                k = failure[k - 1];
            }
            if pattern[i] == pattern[k] {
                k += 1;
            }
            failure[i] = k;
        }

        Self {
            pattern,
            failure,
            matched: 0,
        }
    }

    /// Feed one character. Returns `true` when the delimiter just completed.
    pub(crate) fn advance(&mut self, c: char) -> bool {
        while self.matched > 0 && self.pattern[self.matched] != c {
            self.matched = self.failure[self.matched - 1];
        }
        if self.pattern[self.matched] == c {
            self.matched += 1;
        }
        if self.matched == self.pattern.len() {
            self.matched = 0;
            return true;
        }
        false
    }

    /// Characters of the delimiter matched so far
    pub(crate) fn matched(&self) -> usize {
        self.matched
    }

    pub(crate) fn reset(&mut self) {
        self.matched = 0;
    }
}
