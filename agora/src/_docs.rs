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
//! General (i.e. not documenting a particular struct or a method) documentation goes here.
//!
//! ## What This Crate Is
//!
//! A forum backend is mostly plumbing: bind a request, check a token, write a row. The one part
//! with real design pressure is voting & ranking: recording each user's vote on each post,
//! maintaining two rankings (by recency & by score), refusing votes once a post has aged out of its
//! voting window, and serving paginated (and optionally community-scoped) rankings. That's this
//! crate. Everything else (HTTP, authn, the relational store) is treated as a collaborator & is
//! only modelled at its interface (see [relational](crate::relational)).
//!
//! ## The Data Structures
//!
//! The state lives behind [Backend](crate::storage::Backend) & consists of:
//!
//! - two global [SortedIndex](crate::sorted_index::SortedIndex)es: posts by creation time, and
//!   posts by score (creation time plus the vote weight times the net vote)
//! - one "ledger" per post: a sorted index from voter to direction (-1 or 1; absence means "no
//!   vote")
//! - a record snapshot per post, denormalizing the fields a listing needs (title, summary, author,
//!   creation time, vote count & comment count)
//! - one set of post IDs per community
//! - community-scoped rankings, derived from the above & expiring after a configurable TTL
//!
//! The score is deliberately *not* a pure vote count: seeding it with the creation time means that
//! newer posts float above older ones unless the older posts have accumulated votes. With the
//! default weight of 432 seconds per vote, a post needs 200 net votes to hold its position for a
//! day (86,400/432 = 200).
//!
//! ## Atomicity
//!
//! A vote touches three structures (the score index, the ledger & the record snapshot) and they
//! must move together. I've modelled the store's transactional capability as a single method,
//! [apply_atomically](crate::storage::Backend::apply_atomically), that takes a list of
//! preconditions & a list of mutations: either every precondition holds & every mutation is
//! applied, or nothing happens & the caller is told there was a conflict. The vote engine uses
//! that as an optimistic compare-and-swap on the voter's ledger slot. I went this way (rather than
//! taking a lock) because the backing store may well be shared across processes, at which point a
//! process-local mutex buys nothing.
//!
//! ## Staleness
//!
//! Community-scoped rankings are snapshots. A vote committed after a snapshot was taken won't show
//! up in that community's listing until the snapshot expires. That's intentional; rebuilding on
//! every vote would turn each vote into an O(community size) operation.
