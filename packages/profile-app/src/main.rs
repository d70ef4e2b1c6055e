use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use profile_app::{
    Config, Deps, HttpNameService, InMemorySaveRegistry, Message, NameService, Profile,
    SaveRegistry, StaticNameService,
};

#[derive(Parser)]
#[command(name = "profile-demo")]
#[command(about = "Drive a profile through a scripted session", long_about = None)]
struct Cli {
    /// Starting title
    #[arg(long, default_value = "Matt")]
    title: String,

    /// Fetch the name from this URL instead of PROFILE_NAME_URL
    #[arg(long)]
    name_url: Option<String>,

    /// Item id to save (repeatable)
    #[arg(long = "save", value_name = "ID")]
    saves: Vec<String>,

    /// Item id to unsave after the saves land (repeatable)
    #[arg(long = "unsave", value_name = "ID")]
    unsaves: Vec<String>,

    /// Ticker period in milliseconds, 0 disables it
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Keep the session open this long before reporting
    #[arg(long, default_value_t = 0)]
    linger_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,uniflow=debug,profile_app=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.name_url {
        config.name_url = Some(url);
    }
    if let Some(ms) = cli.tick_ms {
        config.tick = (ms > 0).then(|| Duration::from_millis(ms));
    }

    let names: Arc<dyn NameService> = match &config.name_url {
        Some(url) => {
            info!(url = %url, "Using HTTP name service");
            Arc::new(HttpNameService::new(url.clone()))
        }
        None => {
            info!(name = %config.fallback_name, "Using static name service");
            Arc::new(StaticNameService::new(config.fallback_name.clone()))
        }
    };
    let registry = Arc::new(InMemorySaveRegistry::new());

    let mut deps = Deps::new(names, registry.clone());
    if let Some(period) = config.tick {
        deps = deps.with_tick(period);
    }

    let driver = profile_app::start(Profile::new(cli.title, deps));

    driver.send(Message::MakeAndrew);
    for id in cli.saves {
        driver.send(Message::Save(id));
    }
    driver.settle_timeout(config.settle_timeout).await?;

    for id in cli.unsaves {
        driver.send(Message::Unsave(id));
    }
    driver.settle_timeout(config.settle_timeout).await?;

    if cli.linger_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;
    }

    let state = driver.with_state(|profile| profile.state.clone());
    info!(
        transitions = driver.generation(),
        registry = ?registry.saved_ids(),
        "Session finished"
    );
    println!("{}", serde_json::to_string_pretty(&state)?);

    Ok(())
}
