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

//! # agora-sim
//!
//! Drive the agora engine with a synthetic, but reproducible, workload.
//!
//! agora-sim builds an engine over the in-memory store, creates a batch of posts spread across a
//! few communities, then lets a crowd of voters loose on them, one tokio task per voter. When the
//! dust settles, it prints the resulting rankings along with the engine's counters. Every random
//! choice is drawn from a PRNG seeded from the command line (or configuration), so two runs with
//! the same seed produce the same rankings.

use std::{
    fmt::Display,
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use clap::{Arg, ArgAction, Command, crate_authors, crate_version, value_parser};
use futures::future::try_join_all;
use itertools::Itertools;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use snafu::prelude::*;
use tap::Pipe;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{Layer, Registry, filter::EnvFilter, fmt, layer::SubscriberExt};

use agora::{
    agora::Agora,
    clock::ManualClock,
    config::{ConfigV1, WorkloadConfig, parse_config},
    entities::{CommunityId, Direction, Order, PostId, UserId},
    in_memory::{InMemory, InMemoryRelational},
    metrics::{Instruments, check_metric_registrations},
    relational::{Community, User},
    votes,
};

#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to create post {n}: {source}"))]
    CreatePost {
        n: usize,
        source: agora::agora::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("While listing posts, {source}"))]
    Listing { source: agora::agora::Error },
    #[snafu(display("Failed to open the agora log file: {source}"))]
    LogFile { source: std::io::Error },
    #[snafu(display("{source}"))]
    ParseConfig { source: agora::config::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
    #[snafu(display("A voter task failed: {source}"))]
    Voter { source: tokio::task::JoinError },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The simulated clock starts here, so that runs are reproducible
const START: i64 = 1_735_689_600; // 2025-01-01T00:00:00Z

struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    pub posts: Option<usize>,
    pub voters: Option<usize>,
    pub communities: Option<usize>,
    pub seed: Option<u64>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
            posts: matches.get_one::<usize>("posts").copied(),
            voters: matches.get_one::<usize>("voters").copied(),
            communities: matches.get_one::<usize>("communities").copied(),
            seed: matches.get_one::<u64>("seed").copied(),
        }
    }
    /// Command-line arguments override the configuration file
    fn workload(&self, cfg: &WorkloadConfig) -> WorkloadConfig {
        WorkloadConfig {
            posts: self.posts.unwrap_or(cfg.posts),
            voters: self.voters.unwrap_or(cfg.voters).max(1),
            communities: self.communities.unwrap_or(cfg.communities).max(1),
            seed: self.seed.unwrap_or(cfg.seed),
        }
    }
}

/// Build the formatting layer & filter for the process
///
/// Logs go to `logfile` if given, stdout otherwise; they're JSON unless `--plain` was given.
fn configure_logging(
    logopts: &LogOpts,
    logfile: Option<&Path>,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    let formatter: Box<dyn Layer<Registry> + Send + Sync> = match logfile {
        Some(pth) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(pth)
                .context(LogFileSnafu)?
                .pipe(Mutex::new);
            if logopts.plain {
                Box::new(
                    fmt::Layer::default()
                        .compact()
                        .with_ansi(false)
                        .with_writer(log_file),
                )
            } else {
                Box::new(
                    fmt::Layer::default()
                        .json()
                        .with_current_span(true)
                        .with_writer(log_file),
                )
            }
        }
        None if logopts.plain => {
            Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
        }
        None => Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        ),
    };

    Ok((formatter, filter))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the workload                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A few dozen words from which to make up post content
const WORDS: &[&str] = &[
    "the", "of", "and", "a", "to", "in", "is", "you", "that", "it", "he", "was", "for", "on",
    "are", "as", "with", "his", "they", "at", "be", "this", "have", "from", "or", "one", "had",
    "by", "word", "but", "not", "what", "all", "were", "we", "when", "your", "can", "said",
    "there", "use", "an", "each", "which", "she", "do", "how", "their", "if", "will", "up",
    "other", "about", "out", "many", "then", "them", "these", "so", "some", "her", "would",
    "make", "like", "him", "into", "time", "has", "look", "two", "more", "write", "go", "see",
];

fn babble(rng: &mut StdRng, words: usize) -> String {
    (0..words)
        .map(|_| WORDS.choose(rng).copied().unwrap_or("lorem"))
        .join(" ")
}

/// Each voter's plan: the posts they'll vote on, & how
fn plan_votes(rng: &mut StdRng, posts: &[PostId], voters: usize) -> Vec<Vec<(PostId, Direction)>> {
    (0..voters)
        .map(|_| {
            let n = rng.gen_range(0..=posts.len().min(12));
            posts
                .choose_multiple(rng, n)
                .map(|post| {
                    let direction = match rng.gen_range(0..100) {
                        0..60 => Direction::Up,
                        60..85 => Direction::Down,
                        _ => Direction::Neutral,
                    };
                    (*post, direction)
                })
                .collect()
        })
        .collect()
}

/// What became of one voter's plan
#[derive(Debug, Default)]
struct Tally {
    cast: usize,
    rejected: usize,
    failed: usize,
}

impl std::ops::AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.cast += rhs.cast;
        self.rejected += rhs.rejected;
        self.failed += rhs.failed;
    }
}

async fn vote(agora: Arc<Agora>, voter: UserId, plan: Vec<(PostId, Direction)>) -> Tally {
    let mut tally = Tally::default();
    for (post, direction) in plan {
        match agora.cast_vote(voter, post, direction).await {
            Ok(_) => tally.cast += 1,
            Err(
                err @ (votes::Error::DuplicateVote { .. } | votes::Error::WindowExpired { .. }),
            ) => {
                debug!("{}", err);
                tally.rejected += 1;
            }
            Err(err) => {
                warn!("{} failed to vote on {}: {}", voter, post, err);
                tally.failed += 1;
            }
        }
    }
    tally
}

async fn print_page(
    agora: &Agora,
    label: impl Display,
    order: Order,
    community: Option<CommunityId>,
) -> Result<()> {
    let page = agora
        .list_posts(order, community, 1, Some(10))
        .await
        .context(ListingSnafu)?;
    println!("{} ({} posts in all):", label, page.total);
    for summary in &page.posts {
        let hot = agora
            .hot_rank(summary.id)
            .await
            .context(ListingSnafu)?;
        println!(
            "    {:>5} {:>4} votes {:>3} comments  hot {:>5}  {} in {}: \"{}\"",
            summary.id.to_string(),
            summary.votes,
            summary.comments,
            hot,
            summary.author,
            summary.community,
            summary.title
        );
    }
    Ok(())
}

async fn simulate(opts: CliOpts, cfg: ConfigV1) -> Result<()> {
    check_metric_registrations();

    let workload = opts.workload(&cfg.workload);
    info!("Running workload {:?}", workload);
    let mut rng = StdRng::seed_from_u64(workload.seed);

    let start: DateTime<Utc> = DateTime::from_timestamp(START, 0).unwrap_or_default();
    let clock = ManualClock::new(start);
    let db = Arc::new(InMemoryRelational::new());
    for id in 1..=workload.voters as u64 {
        db.add_user(User {
            id: UserId::new(id),
            name: format!("user{}", id),
        })
        .await;
    }
    for id in 1..=workload.communities as u64 {
        db.add_community(Community {
            id: CommunityId::new(id),
            name: format!("community{}", id),
            introduction: babble(&mut rng, 8),
            created_at: start,
        })
        .await;
    }

    let agora = Arc::new(Agora::new(
        Arc::new(InMemory::new(Arc::new(clock.clone()))),
        db,
        Arc::new(clock.clone()),
        Arc::new(Instruments::default()),
        cfg.engine,
    ));

    let mut posts = Vec::with_capacity(workload.posts);
    for n in 0..workload.posts {
        let author = UserId::new(rng.gen_range(1..=workload.voters as u64));
        let community = CommunityId::new(rng.gen_range(1..=workload.communities as u64));
        let words = rng.gen_range(5..200);
        let content = babble(&mut rng, words);
        let post = agora
            .create_post(author, community, &format!("Post #{}", n), &content)
            .await
            .context(CreatePostSnafu { n })?;
        for _ in 0..rng.gen_range(0..4) {
            // Comments are only counted, so this can't fail for a post we just created
            if let Err(err) = agora.record_comment(post).await {
                warn!("Failed to record a comment on {}: {}", post, err);
            }
        }
        posts.push(post);
        clock.advance(Duration::minutes(rng.gen_range(1..=90)));
    }

    let tally = plan_votes(&mut rng, &posts, workload.voters)
        .into_iter()
        .enumerate()
        .map(|(i, plan)| {
            tokio::spawn(vote(agora.clone(), UserId::new(i as u64 + 1), plan))
        })
        .pipe(try_join_all)
        .await
        .context(VoterSnafu)?
        .into_iter()
        .fold(Tally::default(), |mut acc, t| {
            acc += t;
            acc
        });
    info!("Voting complete: {:?}", tally);
    println!(
        "{} votes cast, {} rejected, {} failed",
        tally.cast, tally.rejected, tally.failed
    );

    print_page(&agora, "Top posts by score", Order::Score, None).await?;
    print_page(&agora, "Newest posts", Order::Time, None).await?;
    for id in 1..=workload.communities as u64 {
        let community = CommunityId::new(id);
        print_page(
            &agora,
            format!("Top posts in {}", community),
            Order::Score,
            Some(community),
        )
        .await?;
    }

    println!(
        "Counters: {}",
        agora
            .instruments()
            .totals()
            .into_iter()
            .map(|(name, total)| format!("{}={}", name, total))
            .join(", ")
    );

    Ok(())
}

fn main() -> Result<()> {
    // Every option has a corresponding environment variable, for the sake of scripting.
    let opts = CliOpts::new(
        Command::new("agora-sim")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Exercise the agora vote & ranking engine")
            .long_about(
                "`agora-sim` creates posts & casts votes on them concurrently against an \
                 in-memory agora engine, then prints the resulting rankings.",
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("AGORA_CONFIG")
                    .help("path to a configuration file"),
            )
            .arg(
                Arg::new("communities")
                    .long("communities")
                    .num_args(1)
                    .value_parser(value_parser!(usize))
                    .env("AGORA_COMMUNITIES")
                    .help("number of communities across which to spread posts"),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("AGORA_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("AGORA_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("posts")
                    .short('n')
                    .long("posts")
                    .num_args(1)
                    .value_parser(value_parser!(usize))
                    .env("AGORA_POSTS")
                    .help("number of posts to create"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("AGORA_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("seed")
                    .short('s')
                    .long("seed")
                    .num_args(1)
                    .value_parser(value_parser!(u64))
                    .env("AGORA_SEED")
                    .help("seed for the workload's random choices"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("AGORA_VERBOSE")
                    .help("produce prolix output"),
            )
            .arg(
                Arg::new("voters")
                    .short('u')
                    .long("voters")
                    .num_args(1)
                    .value_parser(value_parser!(usize))
                    .env("AGORA_VOTERS")
                    .help("number of concurrent voters"),
            )
            .get_matches(),
    );

    let cfg = parse_config(&opts.cfg).context(ParseConfigSnafu)?;

    let (formatter, filter) = configure_logging(&opts.log_opts, cfg.log_file.as_deref())?;
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)?;

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(simulate(opts, cfg))
}
