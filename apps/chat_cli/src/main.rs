use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{
    Backoff, ClientEvent, ConnectionState, DeliveryState, HttpTransport, ReconcileOptions,
    ReconcilingClient, TimelineEntry, WsTransport,
};
use shared::{
    domain::{ChannelId, CourseId, MessageId, MessageStatus},
    protocol::{ChannelSummary, MessagePayload},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse, Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server_url: String,
    #[arg(long, env = "COMMUNITY_TOKEN")]
    token: String,
    #[arg(long)]
    course_id: i64,
    #[arg(long, default_value = "discussion")]
    channel: String,
    #[arg(long, default_value_t = 8)]
    ack_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let rest = Arc::new(HttpTransport::new(&args.server_url, &args.token));
    let realtime = Arc::new(WsTransport::connect(
        &args.server_url,
        &args.token,
        Backoff::default(),
    )?);
    let options = ReconcileOptions {
        ack_timeout: Duration::from_secs(args.ack_timeout_secs),
        ..ReconcileOptions::default()
    };
    let client = ReconcilingClient::new(rest.clone(), realtime, options);
    let course_id = CourseId(args.course_id);

    let printer = tokio::spawn(print_events(Arc::clone(&client)));

    let mut channels = client.list_channels(course_id).await?;
    print_channels(&channels);
    let start = find_channel(&channels, &args.channel)
        .or_else(|| channels.first().map(|c| c.id))
        .ok_or_else(|| anyhow!("course {} has no channels", course_id.0))?;
    client.select_channel(course_id, start).await?;
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("! {err}");
                continue;
            }
        };
        let Some(channel_id) = client.selected_channel().await else {
            continue;
        };

        match command {
            Command::Say(text) => spawn_send(&client, channel_id, text, None),
            Command::Reply { parent_id, text } => {
                spawn_send(&client, channel_id, text, Some(parent_id))
            }
            Command::Retry { client_id } => {
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    if let Err(err) = client.retry(channel_id, &client_id).await {
                        println!("! retry failed: {err}");
                    }
                });
            }
            Command::Channels => match client.list_channels(course_id).await {
                Ok(fresh) => {
                    channels = fresh;
                    print_channels(&channels);
                }
                Err(err) => println!("! {err}"),
            },
            Command::Join { slug } => match find_channel(&channels, &slug) {
                Some(target) => {
                    if let Err(err) = client.select_channel(course_id, target).await {
                        println!("! cannot open #{slug}: {err}");
                    }
                }
                None => println!("! no channel #{slug}"),
            },
            Command::Older => match client.load_older(channel_id).await {
                Ok(0) => println!("* no older messages"),
                Ok(count) => println!("* loaded {count} older messages"),
                Err(err) => println!("! {err}"),
            },
            Command::Moderate {
                message_id,
                request,
            } => match rest.moderate(message_id, request).await {
                Ok(message) => println!("* {}", format_flags(&message)),
                Err(err) => println!("! {err}"),
            },
            Command::Report { message_id, reason } => {
                match rest.report(message_id, &reason).await {
                    Ok(()) => println!("* reported [{}]", message_id.0),
                    Err(err) => println!("! {err}"),
                }
            }
            Command::Log { message_id } => match rest.moderation_log(message_id).await {
                Ok(actions) => {
                    for action in actions {
                        println!(
                            "  {} {:?} by user {}",
                            action.created_at.format("%Y-%m-%d %H:%M"),
                            action.action,
                            action.actor_id.0
                        );
                    }
                }
                Err(err) => println!("! {err}"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    printer.abort();
    Ok(())
}

fn spawn_send(
    client: &Arc<ReconcilingClient>,
    channel_id: ChannelId,
    text: String,
    parent_id: Option<MessageId>,
) {
    let client = Arc::clone(client);
    // failures are printed from the delivery events
    tokio::spawn(async move {
        if let Err(err) = client.send(channel_id, text, parent_id).await {
            tracing::debug!(%err, "send ended without delivery");
        }
    });
}

fn find_channel(channels: &[ChannelSummary], slug: &str) -> Option<ChannelId> {
    channels.iter().find(|c| c.slug == slug).map(|c| c.id)
}

fn print_channels(channels: &[ChannelSummary]) {
    for channel in channels {
        let lock = if channel.is_locked { " (locked)" } else { "" };
        println!("  #{} {:?}{lock}", channel.slug, channel.channel_type);
    }
}

/// Prints every confirmed message once, plus delivery failures and
/// connection changes.
async fn print_events(client: Arc<ReconcilingClient>) {
    let mut events = client.subscribe_events();
    let mut printed: HashSet<MessageId> = HashSet::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::TimelineUpdated { channel_id } => {
                if client.selected_channel().await != Some(channel_id) {
                    continue;
                }
                let timeline = client.timeline(channel_id).await;
                for entry in timeline.iter().rev() {
                    if let Some(id) = entry.id() {
                        if printed.insert(id) {
                            println!("{}", format_entry(entry));
                        }
                    }
                }
            }
            ClientEvent::Delivery {
                client_id,
                state: DeliveryState::Failed(err),
                ..
            } => println!("! not delivered: {err} (/retry {client_id})"),
            ClientEvent::Delivery { .. } => {}
            ClientEvent::Connection(ConnectionState::Connected) => println!("* connected"),
            ClientEvent::Connection(ConnectionState::Reconnecting) => {
                println!("* reconnecting; sends continue over http")
            }
            ClientEvent::Error(err) => println!("! {err}"),
        }
    }
}

fn format_entry(entry: &TimelineEntry) -> String {
    match &entry.message {
        Some(message) => {
            let thread = message
                .parent_id
                .map(|p| format!(" re:{}", p.0))
                .unwrap_or_default();
            format!(
                "{}{thread} user {}: {}",
                format_flags(message),
                message.author_id.0,
                message.body
            )
        }
        None => format!("[sending] {}", entry.body),
    }
}

fn format_flags(message: &MessagePayload) -> String {
    let mut flags = vec![message.id.0.to_string()];
    if message.is_pinned {
        flags.push("pinned".into());
    }
    if message.is_answer {
        flags.push("answer".into());
    }
    if message.is_locked {
        flags.push("locked".into());
    }
    if message.status != MessageStatus::Active {
        flags.push("hidden".into());
    }
    format!("[{}]", flags.join(" "))
}
