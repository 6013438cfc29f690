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

//! # agora
//!
//! The vote & ranking core of a community forum. See [_docs] for the general discussion; the
//! entry point for callers is [agora::Agora].
pub mod _docs;
#[allow(clippy::module_inception)]
pub mod agora;
pub mod clock;
pub mod config;
pub mod entities;
#[path = "hot-rank.rs"]
pub mod hot_rank;
#[path = "in-memory.rs"]
pub mod in_memory;
pub mod metrics;
#[path = "ranking-cache.rs"]
pub mod ranking_cache;
pub mod relational;
#[path = "sorted-index.rs"]
pub mod sorted_index;
pub mod storage;
pub mod votes;
