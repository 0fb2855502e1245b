mod console;

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use rootinha::{
    ActionContext, ActionRequest, GitHub, Invocation, Mode, Router, Settings, parse_args,
};
use tracing::{error, info};
use uuid::Uuid;

fn handle_clap_help_version(clap_err: &clap::Error) -> ! {
    use clap::error::ErrorKind;
    match clap_err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{clap_err}");
            std::process::exit(0);
        }
        _ => {
            eprint!("{clap_err}");
            std::process::exit(2);
        }
    }
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_router(settings: &Settings, root: ActionContext) -> Result<Router> {
    let forge = GitHub::new(
        settings.github.url.as_deref(),
        settings.token()?,
        settings.page_size,
    )?;
    let router = settings.compile(Arc::new(forge))?.with_root(root);
    Ok(router)
}

async fn dispatch_once(
    router: &Router,
    action: &str,
    params: HashMap<String, String>,
    template: String,
    channel: String,
) {
    let request = ActionRequest::new(channel, Uuid::new_v4().to_string(), template, params);
    let response = router.dispatch(action, &request).await;
    println!("{}", response.text());
}

async fn run(invocation: Invocation, settings: Settings) -> Result<()> {
    let root = ActionContext::default();
    let router = build_router(&settings, root.clone())?;

    let shutdown = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling in-flight requests");
            shutdown.cancel();
        }
    });

    match invocation.mode {
        Mode::Actions => {
            for id in router.registry().ids() {
                println!("{id}");
            }
        }
        Mode::Dispatch {
            action,
            params,
            template,
            channel,
        } => dispatch_once(&router, &action, params, template, channel).await,
        Mode::Console { max_in_flight } => {
            info!(config = %invocation.config.display(), "listening on stdin");
            tokio::select! {
                result = console::run(&router, max_in_flight) => result?,
                _ = root.cancelled() => {}
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let invocation = match parse_args(std::env::args()) {
        Ok(invocation) => invocation,
        Err(err) => {
            if let Some(clap_err) = err.downcast_ref::<clap::Error>() {
                handle_clap_help_version(clap_err);
            } else {
                return Err(err);
            }
        }
    };

    let settings = Settings::load(&invocation.config)
        .with_context(|| format!("Using config file '{}'", invocation.config.display()))?;

    let level = if invocation.debug {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    init_tracing(level);
    info!(filename = %invocation.config.display(), "using config file");

    if let Err(err) = run(invocation, settings).await {
        error!(error = %err, "bot stopped");
        return Err(err);
    }
    Ok(())
}
