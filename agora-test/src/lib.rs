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

//! # The agora Integration Tests
//!
//! # Introduction
//!
//! The unit tests in the agora crate exercise each component against the in-memory store; the
//! tests here exercise the engine as a whole, the way a caller would: through [Agora], with a
//! number of concurrent tasks where that's the point of the test.
//!
//! As with any integration test that wants fixtures, these tests opt-out of the default test
//! harness:
//!
//! ```toml
//! [[test]]
//!     name = "in-memory"
//!     harness = false
//! ```
//!
//! and use [libtest-mimic] to present the usual test-runner interface.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! # Project Structure
//!
//! The test logic lives in this library, written against [Agora] & the [Helper] trait only, so
//! that it can be run against any store. Code relating to the test framework itself (the `Test`
//! struct, test configuration) belongs in `tests/common`. Each integration test program in `tests`
//! provides a fixture: an [Agora] over some store, and a [Helper] implementation that can reach
//! around the engine to the store & the clock. Right now, there's just the one (`in-memory`).
//!
//! Every test gets a fresh fixture, so tests may run in parallel & may assume they start from an
//! empty store.
//!
//! [Agora]: agora::agora::Agora

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libtest_mimic::Failed;

use agora::entities::{CommunityId, Order, PostId, PostRecord, UserId};

pub mod listings;
pub mod votes;

/// Implementations of this trait will be passed to each test function to enable them to do things
/// like control the clock or talk directly to the store. Each integration test will need to
/// provide an implementation.
#[async_trait]
pub trait Helper {
    /// The engine's current notion of "now"
    fn now(&self) -> DateTime<Utc>;
    /// Move the engine's clock forward by `by`
    fn advance_clock(&self, by: Duration);
    /// Read `post`'s score in one of the global rankings, directly from the store
    async fn score(&self, order: Order, post: PostId) -> Result<Option<f64>, Failed>;
    /// Read `post`'s record snapshot, directly from the store
    async fn record(&self, post: PostId) -> Result<Option<PostRecord>, Failed>;
    /// Add a user to the relational store
    async fn add_user(&self, user: UserId, name: &str) -> Result<(), Failed>;
    /// Add a community to the relational store
    async fn add_community(&self, community: CommunityId, name: &str) -> Result<(), Failed>;
}
