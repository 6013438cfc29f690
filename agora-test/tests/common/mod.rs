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

use std::{env, fs, sync::Arc};

use futures::future::BoxFuture;
use libtest_mimic::Failed;
use serde::Deserialize;
use snafu::{IntoError, prelude::*};
use tap::Pipe;

use agora::{agora::Agora, config::EngineConfig};
use agora_test::Helper;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read AGORA_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Engine configuration for every fixture
    pub engine: EngineConfig,
    /// Worker threads for the test runtime; None means one per core
    #[serde(rename = "worker-threads")]
    pub worker_threads: Option<usize>,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `AGORA_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("AGORA_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

pub type TestFn = fn(
    Arc<Agora>,
    Arc<dyn Helper + Send + Sync>,
) -> BoxFuture<'static, std::result::Result<(), Failed>>;

pub struct Test {
    pub name: &'static str,
    pub test_fn: TestFn,
}

inventory::collect!(Test);
