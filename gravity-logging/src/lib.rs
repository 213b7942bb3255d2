#![deny(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

//! Constants for categorizing the logging type and consolidated logging setup
//!
//! The `gr` prefix marks targets that are stable identifiers: operators filter
//! on them with `RUST_LOG` (e.g. `RUST_LOG=gr::oracle=debug`), so renaming one
//! is a breaking change for deployments.

use std::env;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_CORE: &str = "gr::core";
pub const LOG_DB: &str = "gr::db";
pub const LOG_TASK: &str = "gr::task";
pub const LOG_LEDGER: &str = "gr::ledger";
pub const LOG_ORACLE: &str = "gr::oracle";
pub const LOG_RELAY: &str = "gr::oracle::relay";
pub const LOG_RPC: &str = "gr::rpc";

/// Consolidates the setup of the tracing subscriber for the daemons and test
/// binaries
#[derive(Default)]
pub struct TracingSetup {
    base_level: Option<String>,
    extra_directives: Vec<String>,
}

impl TracingSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base log level applied below `RUST_LOG`, defaults to `info`
    pub fn with_base_level(&mut self, level: impl Into<String>) -> &mut Self {
        self.base_level = Some(level.into());
        self
    }

    /// Add a filter directive on top of `RUST_LOG`
    pub fn with_directive(&mut self, directive: &str) -> &mut Self {
        self.extra_directives.push(directive.to_owned());
        self
    }

    /// Initialize the logging, must be called for the logging to take effect
    pub fn init(&mut self) -> anyhow::Result<()> {
        let base_level = self.base_level.clone().unwrap_or_else(|| "info".to_owned());

        let mut filter = EnvFilter::builder()
            .with_default_directive(base_level.parse()?)
            .with_env_var("RUST_LOG")
            .from_env_lossy();
        for directive in &self.extra_directives {
            filter = filter.add_directive(directive.parse()?);
        }

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(env::var_os("NO_COLOR").is_none())
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;

        Ok(())
    }
}
