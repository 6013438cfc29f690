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

//! # hot-rank
//!
//! The "hot" ranking function, as popularized by reddit.
//!
//! The vote differential contributes logarithmically (the first ten net votes count as much as the
//! next ninety) and recency linearly, one point per twelve hours since [EPOCH]. It's not wired into
//! the default score path, but callers may select it.

use chrono::{DateTime, Utc};

/// Recency is measured from 2020-01-01T00:00:00Z
pub const EPOCH: i64 = 1_577_836_800;

/// Twelve hours, in seconds
const PERIOD: f64 = 43_200.0;

pub fn hot_rank(ups: u64, downs: u64, created_at: &DateTime<Utc>) -> f64 {
    let diff = ups as i64 - downs as i64;
    let order = (diff.unsigned_abs().max(1) as f64).log10();
    let sign = diff.signum() as f64;
    let seconds = (created_at.timestamp() - EPOCH) as f64;
    (sign * order + seconds / PERIOD).round()
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(offset: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(EPOCH + offset, 0).unwrap()
    }

    #[test]
    fn reference_values() {
        // log10(8) = 0.903..., which rounds to one
        assert_eq!(hot_rank(10, 2, &at(0)), 1.0);
        assert_eq!(hot_rank(10, 2, &at(432_000)), 11.0);
        assert_eq!(hot_rank(2, 10, &at(0)), -1.0);
        assert_eq!(hot_rank(5, 5, &at(432_000)), 10.0);
        assert_eq!(hot_rank(0, 0, &at(0)), 0.0);
        // 100.4 periods + 0.903 rounds up to 101
        assert_eq!(hot_rank(10, 2, &at(4_337_280)), 101.0);
        // A hundred net votes are worth two points, i.e. a day
        assert_eq!(hot_rank(100, 0, &at(0)), 2.0);
        assert_eq!(hot_rank(0, 0, &at(86_400)), 2.0);
    }

    #[test]
    fn before_the_epoch() {
        assert_eq!(hot_rank(1, 0, &at(-432_000)), -10.0);
    }
}
