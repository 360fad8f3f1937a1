//! Routing-key pattern matching with topic exchange semantics.
//!
//! Routing keys are dot-delimited words (`product.deleted`). Binding patterns
//! use the same shape plus two wildcards:
//!
//! - `*` matches exactly one word
//! - `#` matches zero or more words
//!
//! ```text
//! product.#        matches product, product.deleted, product.stock.updated
//! *.deleted        matches user.deleted, product.deleted
//! inventory.*      matches inventory.reserved, not inventory or inventory.a.b
//! ```

use std::str::FromStr;

use crate::error::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Word(String),
    One,
    ZeroOrMore,
}

/// A parsed topic binding pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutingPattern {
    /// Parses a binding pattern.
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern cannot be empty".to_string(),
            });
        }

        let mut segments = Vec::new();
        for word in pattern.split('.') {
            let segment = match word {
                "*" => Segment::One,
                "#" => Segment::ZeroOrMore,
                w if w.contains('*') || w.contains('#') => {
                    return Err(BusError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: format!("wildcard must be a whole word, found '{w}'"),
                    });
                }
                w => Segment::Word(w.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the routing key is selected by this pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split('.').collect();
        match_words(&self.segments, &words)
    }
}

fn match_words(segments: &[Segment], words: &[&str]) -> bool {
    match segments.split_first() {
        None => words.is_empty(),
        Some((Segment::ZeroOrMore, rest)) => {
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((Segment::One, rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((Segment::Word(expected), rest)) => match words.split_first() {
            Some((word, remaining)) => word == expected && match_words(rest, remaining),
            None => false,
        },
    }
}

impl FromStr for RoutingPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RoutingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
