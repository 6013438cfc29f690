// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of agora.
//
// agora is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// agora is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with agora.  If not,
// see <http://www.gnu.org/licenses/>.

//! # entities
//!
//! Core agora types.
//!
//! Identifiers are opaque 64-bit integers handed to us by the relational collaborator (which, in
//! the deployments I have in mind, mints them with a snowflake-style generator). I wrap each in a
//! newtype so that a [PostId] can't be passed where a [UserId] is wanted.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("{value} is not a valid vote direction (expected -1, 0 or 1)"))]
    BadDirection { value: i64, backtrace: Backtrace },
    #[snafu(display("Failed to parse '{text}' as an identifier: {source}"))]
    BadId {
        text: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("'{text}' is not a ranking order (expected \"time\" or \"score\")"))]
    BadOrder { text: String, backtrace: Backtrace },
}

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           identifiers                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $type_name(u64);
        impl $type_name {
            pub const fn new(id: u64) -> $type_name {
                $type_name(id)
            }
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl From<u64> for $type_name {
            fn from(value: u64) -> Self {
                $type_name(value)
            }
        }
        impl FromStr for $type_name {
            type Err = Error;
            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                s.parse::<u64>()
                    .map($type_name)
                    .context(BadIdSnafu { text: s.to_owned() })
            }
        }
    };
}

define_id!(PostId);
define_id!(UserId);
define_id!(CommunityId);

impl CommunityId {
    /// The forum has historically used community zero to mean "no community", i.e. an unscoped
    /// request.
    pub fn is_unscoped(&self) -> bool {
        0 == self.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Direction                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A vote direction
///
/// This does double duty: it's both what a voter asks for (up, down, or "take back my vote") and
/// the state of a voter's ledger slot (where [Direction::Neutral] means there's no record at all).
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    Down,
    Neutral,
    Up,
}

impl Direction {
    pub fn as_i8(&self) -> i8 {
        match self {
            Direction::Down => -1,
            Direction::Neutral => 0,
            Direction::Up => 1,
        }
    }
    /// The value stored in a post's ledger for this direction; None for [Direction::Neutral],
    /// which is represented by the absence of a record.
    pub fn ledger_score(&self) -> Option<f64> {
        match self {
            Direction::Neutral => None,
            _ => Some(self.as_i8() as f64),
        }
    }
    /// Map a ledger score back to a [Direction]; anything other than exactly -1 or 1 is garbage
    pub fn from_ledger_score(score: f64) -> Option<Direction> {
        if score == 1.0 {
            Some(Direction::Up)
        } else if score == -1.0 {
            Some(Direction::Down)
        } else {
            None
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

impl From<Direction> for i8 {
    fn from(value: Direction) -> Self {
        value.as_i8()
    }
}

impl TryFrom<i8> for Direction {
    type Error = Error;
    fn try_from(value: i8) -> StdResult<Self, Self::Error> {
        match value {
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::Neutral),
            1 => Ok(Direction::Up),
            n => BadDirectionSnafu { value: n as i64 }.fail(),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s.trim() {
            "1" | "+1" => Ok(Direction::Up),
            "0" => Ok(Direction::Neutral),
            "-1" => Ok(Direction::Down),
            // Try to give a helpful message for out-of-range integers
            text => match text.parse::<i64>() {
                Ok(n) => BadDirectionSnafu { value: n }.fail(),
                Err(_) => BadDirectionSnafu { value: i64::MIN }.fail(),
            },
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Order                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The two global rankings
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Most recent first
    Time,
    /// Highest score first
    Score,
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Time => write!(f, "time"),
            Order::Score => write!(f, "score"),
        }
    }
}

impl FromStr for Order {
    type Err = Error;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s {
            "time" => Ok(Order::Time),
            "score" => Ok(Order::Score),
            _ => BadOrderSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           PostRecord                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The denormalized per-post snapshot used to render a listing without going back to the
/// relational store
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PostRecord {
    pub title: String,
    pub summary: String,
    pub author: UserId,
    pub community: CommunityId,
    #[serde(rename = "created-at")]
    pub created_at: DateTime<Utc>,
    /// Number of voters with a non-neutral vote on this post
    pub votes: u64,
    pub comments: u64,
}

/// Numeric fields of a [PostRecord] that may be incremented in place
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordField {
    Votes,
    Comments,
}

/// Convert a timestamp to the numeric domain used by the rankings
///
/// Rankings are scored in whole seconds since the Unix epoch; that keeps arithmetic on them exact
/// (an `f64` has 52 bits of mantissa, which covers seconds-since-epoch for the foreseeable future).
pub fn timestamp_score(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64
}

/// Inverse of [timestamp_score]; None if `score` is out of range for a [DateTime]
pub fn score_timestamp(score: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(score as i64, 0)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           summaries                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const ELLIPSIS: &str = "...";

// ASCII characters are word constituents iff they're alphanumeric or an underscore; beyond ASCII,
// letters & digits are word constituents, and only whitespace separates. Punctuation outside
// ASCII is therefore treated as part of a word.
fn is_separator(c: char) -> bool {
    if c.is_ascii() {
        !(c.is_ascii_alphanumeric() || '_' == c)
    } else if c.is_alphabetic() || c.is_numeric() {
        false
    } else {
        c.is_whitespace()
    }
}

/// Truncate `text` to at most `max_words` words, appending "..." if anything was dropped
///
/// A word is counted when the separator following it is seen; the text is cut at that separator.
/// If what would be dropped is no longer than the ellipsis itself, `text` is returned unchanged.
/// A `max_words` of zero never matches a word count, so it leaves `text` alone, too.
pub fn truncate_by_words(text: &str, max_words: usize) -> String {
    let mut words = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if !is_separator(c) {
            in_word = true;
            continue;
        }
        if !in_word {
            continue;
        }
        in_word = false;
        words += 1;
        if words == max_words {
            if i + ELLIPSIS.len() >= text.len() {
                return text.to_owned();
            }
            return format!("{}{}", &text[..i], ELLIPSIS);
        }
    }
    text.to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_conversions() {
        assert_eq!(Direction::try_from(1i8).unwrap(), Direction::Up);
        assert_eq!(Direction::try_from(0i8).unwrap(), Direction::Neutral);
        assert_eq!(Direction::try_from(-1i8).unwrap(), Direction::Down);
        assert!(Direction::try_from(2i8).is_err());
        assert!(Direction::try_from(-5i8).is_err());

        assert_eq!("+1".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!(" -1 ".parse::<Direction>().unwrap(), Direction::Down);
        assert!("up".parse::<Direction>().is_err());
        assert!("3".parse::<Direction>().is_err());

        assert_eq!(Direction::Up.ledger_score(), Some(1.0));
        assert_eq!(Direction::Neutral.ledger_score(), None);
        assert_eq!(Direction::from_ledger_score(-1.0), Some(Direction::Down));
        assert_eq!(Direction::from_ledger_score(0.5), None);

        let d: Direction = toml::from_str::<std::collections::HashMap<String, Direction>>("d = -1")
            .unwrap()["d"];
        assert_eq!(d, Direction::Down);
    }

    #[test]
    fn ids_and_orders() {
        assert_eq!("42".parse::<PostId>().unwrap(), PostId::new(42));
        assert!("forty-two".parse::<PostId>().is_err());
        assert_eq!(format!("{}", UserId::new(7)), "7");
        assert!(CommunityId::new(0).is_unscoped());
        assert!(!CommunityId::new(5).is_unscoped());

        assert_eq!("time".parse::<Order>().unwrap(), Order::Time);
        assert_eq!("score".parse::<Order>().unwrap(), Order::Score);
        assert!("hot".parse::<Order>().is_err());
        assert_eq!(format!("{}", Order::Score), "score");
    }

    #[test]
    fn timestamps() {
        let dt = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(timestamp_score(&dt), 1_700_000_000.0);
        assert_eq!(score_timestamp(1_700_000_000.0).unwrap(), dt);
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_by_words("", 3), "");
        assert_eq!(truncate_by_words("one two", 3), "one two");
        assert_eq!(
            truncate_by_words("one two three four five", 3),
            "one two three..."
        );
        // Runs of separators don't produce empty words
        assert_eq!(
            truncate_by_words("one,,  two;  three four five six", 2),
            "one,,  two..."
        );
        // Underscores are word constituents
        assert_eq!(truncate_by_words("snake_case is fun", 1), "snake_case...");
        // If all that would be dropped is no longer than the ellipsis, leave the text alone
        assert_eq!(truncate_by_words("one two a", 2), "one two a");
        // Non-ASCII letters are word constituents; only whitespace separates them
        assert_eq!(truncate_by_words("héllo wörld über alles", 2), "héllo wörld...");
        // Zero means "no limit"
        assert_eq!(truncate_by_words("a b", 0), "a b");
        assert_eq!(truncate_by_words("hello world", 0), "hello world");
    }
}
