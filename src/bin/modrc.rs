// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tokio::io::{stdin, stdout, BufReader};
use tokio::runtime;
use tokio::sync::broadcast::{self, error::RecvError};

use modrc::config::Config;
use modrc::console::Console;
use modrc::logger::{init_tracing, Logger, TracingLogger};
use modrc::procs::{Launcher, LauncherEvent};

const CONFIG: &str = "config";
const PREFIX: &str = "prefix";
const NO_CONSOLE: &str = "no-console";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn app() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new(CONFIG)
                .short('c')
                .long(CONFIG)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("configuration file, layered over /etc/modrc, ~/.modrc, ~/.config/modrc and the nearest .modrc"),
        )
        .arg(
            Arg::new(PREFIX)
                .short('p')
                .long(PREFIX)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("installation root, overrides npm.prefix"),
        )
        .arg(
            Arg::new(NO_CONSOLE)
                .long(NO_CONSOLE)
                .action(ArgAction::SetTrue)
                .help("run without the console until all modules exit or Ctrl-C"),
        )
}

fn main() {
    let args = app().get_matches();

    let config = Config::resolve(args.get_one::<PathBuf>(CONFIG).map(PathBuf::as_path));
    let logging = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new(&logging));

    let mut config = match config {
        Ok(config) => config,
        Err(err) => {
            logger.error(&format!("Initialization failed: {}", err));
            std::process::exit(1);
        }
    };
    if let Some(prefix) = args.get_one::<PathBuf>(PREFIX) {
        config.npm.prefix = prefix.clone();
    }

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to initialize Tokio Runtime");

    let code = runtime.block_on(run(config, logger, &args));

    // stdin may still be held by a blocking read, don't wait for it
    std::process::exit(code);
}

async fn run(config: Config, logger: Arc<dyn Logger>, args: &ArgMatches) -> i32 {
    let mut launcher = Launcher::new(config, Arc::clone(&logger));

    let modules = match init(&mut launcher).await {
        Ok(modules) => modules,
        Err(err) => {
            logger.error(&format!("Initialization failed: {}", err));
            return 1;
        }
    };

    let events = tokio::spawn(print_events(launcher.subscribe()));

    let total = modules.len();
    let started = launcher
        .start_all(modules)
        .await
        .into_iter()
        .filter(|(_, result)| result.is_ok())
        .count();
    logger.info(&format!("Started {} of {} modules", started, total));

    if args.get_flag(NO_CONSOLE) {
        wait_for_shutdown(&launcher).await;
    } else if let Err(err) = Console::new(&launcher)
        .run(BufReader::new(stdin()), stdout())
        .await
    {
        logger.error(&format!("Console failed: {}", err));
    }

    for (module, result) in launcher.stop_all(false).await {
        if let Err(err) = result {
            logger.error(&format!("Failed to stop '{}': {}", module, err));
        }
    }

    events.abort();
    0
}

async fn init(launcher: &mut Launcher) -> Result<Vec<String>, modrc::Error> {
    launcher.init().await?;
    launcher.list().await
}

async fn print_events(mut events: broadcast::Receiver<LauncherEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("* {}", event),
            Err(RecvError::Lagged(missed)) => println!("* {} events missed", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Waits until nothing is running anymore or Ctrl-C arrives
async fn wait_for_shutdown(launcher: &Launcher) {
    let mut events = launcher.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if launcher.running().await.is_empty() {
            break;
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => {
                if let Err(RecvError::Closed) = event {
                    break;
                }
            }
        }
    }
}
