use crate::Context;
use kartwatch_bot::cstr::strip_colors;
use kartwatch_bot::helpers::{format_tics, format_time_online};
use kartwatch_bot::{Remote, ServerFlags, ServerStatus, WatchedServer};
use poise::CreateReply;
use poise::command;
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};
use std::sync::Arc;

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;

const COLOR: u32 = 0x5865F2;

fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command can only be used in a server")?
        .get())
}

fn find_server(ctx: Context<'_>, remote: &str) -> Result<Arc<WatchedServer>, Error> {
    let guild_id = guild_id(ctx)?;
    let remote: Remote = remote.parse()?;
    ctx.data()
        .watcher
        .find(guild_id, &remote)
        .ok_or_else(|| format!("`{}` is not being watched here", remote).into())
}

/// Watch Ring Racers servers from this Discord server
#[command(
    slash_command,
    prefix_command,
    subcommands("add", "remove", "label", "list", "status"),
    subcommand_required
)]
pub async fn server(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Start watching a server
#[command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Server address, host or host:port"] remote: String,
    #[description = "Name to show instead of the server's own"] label: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let server = ctx.data().watcher.add(guild_id, &remote, label).await?;
    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title("Watching Server")
                .description(format!(
                    "Now watching `{}`. Status shows up after the next poll.",
                    server.remote()
                ))
                .color(COLOR),
        ),
    )
    .await?;
    Ok(())
}

/// Stop watching a server
#[command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Server address"] remote: String,
) -> Result<(), Error> {
    let server = find_server(ctx, &remote)?;
    ctx.data().watcher.remove(&server).await?;
    ctx.say(format!("Stopped watching `{}`", server.remote()))
        .await?;
    Ok(())
}

/// Set or clear the label of a watched server
#[command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn label(
    ctx: Context<'_>,
    #[description = "Server address"] remote: String,
    #[description = "New label, leave empty to clear"] label: Option<String>,
) -> Result<(), Error> {
    let server = find_server(ctx, &remote)?;
    ctx.data().watcher.relabel(&server, label).await?;
    ctx.say(format!("`{}` is now shown as **{}**", server.remote(), server.display_name()))
        .await?;
    Ok(())
}

/// List watched servers with their last known state
#[command(slash_command, prefix_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let lines: Vec<String> = ctx
        .data()
        .watcher
        .iter(Some(guild_id))
        .map(|server| summary_line(&server))
        .collect();

    let embed = CreateEmbed::default()
        .title("Watched Servers")
        .color(COLOR);
    let embed = if lines.is_empty() {
        embed.description("No servers watched yet. Add one with `/server add`.")
    } else {
        embed.description(lines.join("\n"))
    };
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show details and players of a watched server
#[command(slash_command, prefix_command)]
pub async fn status(
    ctx: Context<'_>,
    #[description = "Server address"] remote: String,
) -> Result<(), Error> {
    let server = find_server(ctx, &remote)?;

    let mut status = server.status();
    if status.generation == 0 {
        // Never polled yet, give the poller a moment
        ctx.defer().await?;
        if let Some(refreshed) = server.wait_for_refresh(ctx.data().refresh_wait).await {
            status = refreshed;
        }
    }

    let embed = status_embed(&server, &status);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn summary_line(server: &WatchedServer) -> String {
    let status = server.status();
    let name = server.display_name();
    match (&status.info, status.online) {
        (Some(info), true) => format!(
            "🟢 **{}** {}/{} players on {}{}",
            name,
            status.players.len(),
            info.max_players,
            info.map_title,
            status
                .ping()
                .map(|p| format!(" ({:.0} ms)", p))
                .unwrap_or_default()
        ),
        (Some(info), false) => format!("🔴 **{}** offline (last seen on {})", name, info.map_title),
        (None, _) if status.generation > 0 => format!("🔴 **{}** offline", name),
        (None, _) => format!("⏳ **{}** awaiting first poll", name),
    }
}

fn status_embed(server: &WatchedServer, status: &ServerStatus) -> CreateEmbed {
    let title = server.display_name();
    let embed = CreateEmbed::default().color(COLOR).footer(CreateEmbedFooter::new(
        server.remote().to_string(),
    ));

    let Some(info) = &status.info else {
        let text = if status.generation == 0 {
            "This server hasn't been polled yet."
        } else {
            "This server has not answered since it was added."
        };
        return embed.title(format!("🔴 {}", title)).description(text);
    };

    let icon = if status.online { "🟢" } else { "🔴" };
    let mut description = format!(
        "**{}** on **{}** ({})\n{}",
        info.gametype_name,
        info.map_title,
        info.game_speed,
        strip_colors(&info.server_name)
    );
    if !status.online {
        description.push_str("\n\nOffline, showing the last known state.");
    }

    let mut tags = Vec::new();
    if info.flags.contains(ServerFlags::DEDICATED) {
        tags.push("dedicated");
    }
    if info.flags.contains(ServerFlags::VOICE_ENABLED) {
        tags.push("voice");
    }
    if info.flags.contains(ServerFlags::LOTS_OF_ADDONS) || info.number_of_files > 0 {
        tags.push("addons");
    }
    if info.cheats_enabled {
        tags.push("cheats");
    }

    let players = if status.players.is_empty() {
        "Nobody racing".to_string()
    } else {
        status
            .players
            .iter()
            .map(|p| {
                format!(
                    "- {} ({} pts, {})",
                    p.name,
                    p.score,
                    format_time_online(i64::from(p.time_in_server))
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    embed
        .title(format!("{} {}", icon, title))
        .description(description)
        .field(
            "Players",
            format!("{}/{}", status.players.len(), info.max_players),
            true,
        )
        .field(
            "Ping",
            status
                .ping()
                .map(|p| format!("{:.0} ms", p))
                .unwrap_or_else(|| "-".to_string()),
            true,
        )
        .field("Level time", format_tics(info.level_time), true)
        .field(
            "Tags",
            if tags.is_empty() {
                "-".to_string()
            } else {
                tags.join(", ")
            },
            true,
        )
        .field("Roster", players, false)
}
