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

//! # The in-memory Integration Tests
//!
//! Run the agora integration test suite against the in-memory store, with a manual clock. Each
//! test gets its own engine, store & clock, so they're free to run in parallel. Set
//! `AGORA_TEST_CONFIG` to the path of a TOML file to override the engine configuration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use libtest_mimic::{Arguments, Failed, Trial};
use snafu::{ResultExt, Snafu};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use agora::{
    agora::Agora,
    clock::{Clock, ManualClock},
    entities::{CommunityId, Order, PostId, PostRecord, UserId},
    in_memory::{InMemory, InMemoryRelational},
    metrics::Instruments,
    relational::{Community, User},
    storage::Backend,
};
use agora_test::{Helper, listings, votes};

use common::{Configuration, Test};

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build the test runtime: {source}"))]
    Runtime { source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Every fixture's clock starts here (2023-11-14T22:13:20Z)
const START: i64 = 1_700_000_000;

struct InMemoryHelper {
    clock: ManualClock,
    store: Arc<InMemory>,
    db: Arc<InMemoryRelational>,
}

#[async_trait]
impl Helper for InMemoryHelper {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
    fn advance_clock(&self, by: Duration) {
        self.clock.advance(by)
    }
    async fn score(&self, order: Order, post: PostId) -> std::result::Result<Option<f64>, Failed> {
        Ok(self.store.score(order, &post).await?)
    }
    async fn record(&self, post: PostId) -> std::result::Result<Option<PostRecord>, Failed> {
        Ok(self.store.records(&[post]).await?.pop().flatten())
    }
    async fn add_user(&self, user: UserId, name: &str) -> std::result::Result<(), Failed> {
        self.db
            .add_user(User {
                id: user,
                name: name.to_owned(),
            })
            .await;
        Ok(())
    }
    async fn add_community(
        &self,
        community: CommunityId,
        name: &str,
    ) -> std::result::Result<(), Failed> {
        self.db
            .add_community(Community {
                id: community,
                name: name.to_owned(),
                introduction: String::new(),
                created_at: self.clock.now(),
            })
            .await;
        Ok(())
    }
}

fn fixture(cfg: &Configuration) -> (Arc<Agora>, Arc<dyn Helper + Send + Sync>) {
    let clock = ManualClock::new(DateTime::from_timestamp(START, 0).unwrap_or_default());
    let store = Arc::new(InMemory::new(Arc::new(clock.clone())));
    let db = Arc::new(InMemoryRelational::new());
    let agora = Arc::new(Agora::new(
        store.clone(),
        db.clone(),
        Arc::new(clock.clone()),
        Arc::new(Instruments::new("agora-test")),
        cfg.engine.clone(),
    ));
    (agora, Arc::new(InMemoryHelper { clock, store, db }))
}

inventory::submit!(Test {
    name: "test_up_down_retract",
    test_fn: |agora, helper| Box::pin(votes::test_up_down_retract(agora, helper)),
});

inventory::submit!(Test {
    name: "test_rejected_votes",
    test_fn: |agora, helper| Box::pin(votes::test_rejected_votes(agora, helper)),
});

inventory::submit!(Test {
    name: "test_voting_window",
    test_fn: |agora, helper| Box::pin(votes::test_voting_window(agora, helper)),
});

inventory::submit!(Test {
    name: "test_concurrent_voters",
    test_fn: |agora, helper| Box::pin(votes::test_concurrent_voters(agora, helper)),
});

inventory::submit!(Test {
    name: "test_concurrent_changes_of_heart",
    test_fn: |agora, helper| Box::pin(votes::test_concurrent_changes_of_heart(agora, helper)),
});

inventory::submit!(Test {
    name: "test_pagination",
    test_fn: |agora, helper| Box::pin(listings::test_pagination(agora, helper)),
});

inventory::submit!(Test {
    name: "test_community_scoping",
    test_fn: |agora, helper| Box::pin(listings::test_community_scoping(agora, helper)),
});

inventory::submit!(Test {
    name: "test_posts",
    test_fn: |agora, helper| Box::pin(listings::test_posts(agora, helper)),
});

fn main() -> Result<()> {
    let args = Arguments::from_args();
    let config = Configuration::new().context(ConfigurationSnafu)?;

    // Quiet by default; set RUST_LOG to see what the engine is up to
    tracing::subscriber::set_global_default(
        Registry::default()
            .with(fmt::Layer::default().compact().with_writer(std::io::stderr))
            .with(
                EnvFilter::builder()
                    .with_default_directive(tracing::Level::WARN.into())
                    .from_env()
                    .context(FilterSnafu)?,
            ),
    )
    .context(SetGlobalDefaultSnafu)?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = config.worker_threads {
        builder.worker_threads(n);
    }
    let rt: Arc<Runtime> = builder.enable_all().build().context(RuntimeSnafu)?.into();

    debug!("Running the in-memory suite with {:?}", config);

    libtest_mimic::run(
        &args,
        inventory::iter::<Test>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                let cfg = config.clone();
                let rt = rt.clone();
                Trial::test(test.name, move || {
                    let (agora, helper) = fixture(&cfg);
                    rt.block_on((test.test_fn)(agora, helper))
                })
            })
            .collect(),
    )
    .exit();
}
