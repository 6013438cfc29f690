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

//! # config
//!
//! agora configuration.
//!
//! The engine's tunables (the per-vote weight, the voting window, the ranking cache's TTL & so on)
//! live in [EngineConfig]. The on-disk format is versioned: a TOML file whose top-level `version`
//! key selects the schema, of which there is, for now, only one ([ConfigV1]).

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use snafu::{IntoError, prelude::*};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_CONFIG: &str = "/etc/agora.toml";

/// Vote & ranking engine parameters
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Amount by which a single vote moves a post's score, in seconds-equivalent: with the default
    /// of 432, 200 net votes are worth a day of recency.
    #[serde(rename = "vote-weight")]
    pub vote_weight: f64,
    /// Votes on posts older than this are refused
    #[serde(rename = "voting-window")]
    pub voting_window: Duration,
    /// Lifetime of a community-scoped ranking
    #[serde(rename = "ranking-cache-ttl")]
    pub ranking_cache_ttl: Duration,
    /// Page size used when the caller doesn't name one
    #[serde(rename = "default-page-size")]
    pub default_page_size: usize,
    /// Requested page sizes are clamped to this
    #[serde(rename = "max-page-size")]
    pub max_page_size: usize,
    /// Upper bound on any single call to the backing store
    #[serde(rename = "store-timeout")]
    pub store_timeout: Duration,
    /// Number of times a vote will be re-attempted after losing a race for the voter's ledger slot
    #[serde(rename = "max-vote-retries")]
    pub max_vote_retries: usize,
    /// Post bodies are truncated to this many words to produce the summary shown in listings
    #[serde(rename = "summary-words")]
    pub summary_words: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            vote_weight: 432.0,
            voting_window: Duration::from_secs(7 * 24 * 3600),
            ranking_cache_ttl: Duration::from_secs(60),
            default_page_size: 20,
            max_page_size: 100,
            store_timeout: Duration::from_millis(500),
            max_vote_retries: 8,
            summary_words: 120,
        }
    }
}

/// Parameters for the simulator's synthetic workload
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of posts to create
    pub posts: usize,
    /// Number of distinct voters
    pub voters: usize,
    /// Number of communities across which posts are spread
    pub communities: usize,
    /// Seed for the workload's PRNG
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            posts: 50,
            voters: 200,
            communities: 4,
            seed: 0x5eed,
        }
    }
}

/// agora configuration, version one
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigV1 {
    /// If given, log to this file rather than stdout
    #[serde(rename = "log-file")]
    pub log_file: Option<PathBuf>,
    pub engine: EngineConfig,
    pub workload: WorkloadConfig,
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse configuration text
pub fn parse_config_str(pth: &Path, text: &str) -> Result<ConfigV1> {
    match toml::from_str::<Configuration>(text) {
        Ok(Configuration::V1(cfg)) => Ok(cfg),
        Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
    }
}

/// Parse the agora configuration file
///
/// If `cfg` is None, try [DEFAULT_CONFIG], quietly falling back to the defaults if it isn't there;
/// if `cfg` names a file, it had better exist.
pub fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str(DEFAULT_CONFIG).unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => parse_config_str(&pth, &text),
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}
