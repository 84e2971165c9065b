mod discord_commands;
use kartwatch_bot::Watcher;
use kartwatch_bot::config::Config;
use kartwatch_db::Database;
use poise::{Framework, FrameworkOptions, serenity_prelude as serenity};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type Context<'a> = poise::Context<'a, crate::Data, crate::discord_commands::Error>;

pub(crate) struct Data {
    pub(crate) watcher: Arc<Watcher>,
    pub(crate) refresh_wait: Duration,
}

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting kartwatch...");
    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: db_path={}, poll_interval={}s, knock_tries={}, knock_timeout={}ms",
        config.database_path,
        config.poll_interval.as_secs(),
        config.knock_tries,
        config.knock_timeout.as_millis()
    );

    let Some(token) = config.discord_token.clone() else {
        tracing::error!("DISCORD_TOKEN environment variable is required");
        return;
    };

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            return;
        }
    };
    let watcher = Arc::new(Watcher::new(db, config.knocker()));
    if let Err(e) = watcher.load().await {
        tracing::error!("Failed to load watched servers: {}", e);
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(watcher.clone().run(config.poll_interval, shutdown_rx));

    let intents = serenity::GatewayIntents::non_privileged();
    let refresh_wait = config.refresh_wait;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![discord_commands::server()],
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Executing command '{}' by user '{}'",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Finished command '{}' by user '{}'",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        tracing::error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(Data {
                    watcher,
                    refresh_wait,
                })
            })
        })
        .build();

    let mut client = match serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Error creating Discord client: {:?}", e);
            return;
        }
    };
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client error: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = poller.await {
        tracing::error!("Poller task failed: {}", e);
    }
}
