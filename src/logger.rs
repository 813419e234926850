// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Sink for the launcher's log lines.
///
/// The launcher never constructs one, it is handed in by whoever owns the launcher.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);

    fn error(&self, message: &str);
}

/// Forwards log lines to `tracing`, tagged with the configured prefix
#[derive(Debug, Clone)]
pub struct TracingLogger {
    prefix: String,
}

impl TracingLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
        }
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(prefix = %self.prefix, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(prefix = %self.prefix, "{}", message);
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // a subscriber may already be installed, e.g. by a test harness
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
