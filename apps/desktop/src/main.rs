use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{ConversationController, HistoryOutcome, SendOutcome, SendRejection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod settings;
mod render;

use settings::{load_chat_config, ConfigOverrides};
use render::{render_row, render_view};

const HELP: &str = "Type a message and press Enter. Commands: /retry, /refresh, /quit";

#[derive(Parser, Debug)]
#[command(about = "Chat with the assistant service from a terminal")]
struct Args {
    /// Settings file (json/toml/yaml); defaults to ./config.* when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long, conflicts_with = "new_thread")]
    thread_id: Option<String>,
    /// Start a conversation under a freshly generated thread id.
    #[arg(long)]
    new_thread: bool,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long, default_value_t = 80)]
    width: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let thread_id = if args.new_thread {
        Some(Uuid::new_v4().to_string())
    } else {
        args.thread_id
    };
    let chat_config = load_chat_config(
        args.config.as_deref(),
        ConfigOverrides {
            api_url: args.api_url,
            thread_id,
            request_timeout_secs: args.request_timeout_secs,
        },
    )?;
    info!(
        thread_id = %chat_config.thread_id(),
        api_url = chat_config.api_url(),
        "starting chat screen"
    );
    println!(
        "Thread {} at {}",
        chat_config.thread_id(),
        chat_config.api_url()
    );

    let controller =
        ConversationController::connect(chat_config).context("failed to build HTTP client")?;
    let mut screen = Screen {
        controller: &controller,
        width: args.width,
        printed: 0,
    };

    screen.print_view().await;
    if let HistoryOutcome::Failed(err) = controller.mount().await {
        println!("! could not load the conversation: {err}");
    }
    screen.print_view().await;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "/quit" => break,
            "/refresh" => {
                if let HistoryOutcome::Failed(err) = controller.load_history().await {
                    println!("! refresh failed, showing the previous transcript: {err}");
                }
                screen.printed = 0;
                screen.print_view().await;
            }
            "/retry" => {
                let outcome = controller.submit().await;
                screen.report_send(outcome).await;
            }
            _ => {
                controller.set_input(line.clone()).await;
                let outcome = controller.submit().await;
                screen.report_send(outcome).await;
            }
        }
    }

    controller.unmount().await;
    info!("chat screen closed");
    Ok(())
}

struct Screen<'a> {
    controller: &'a ConversationController,
    width: usize,
    printed: usize,
}

impl Screen<'_> {
    /// Prints the loading indicator, or the rows not yet on screen.
    async fn print_view(&mut self) {
        if self.controller.is_loading().await {
            let view = self.controller.view().await;
            for line in render_view(&view, self.width) {
                println!("{line}");
            }
            return;
        }

        for row in self.controller.rows_from(self.printed).await {
            for line in render_row(&row, self.width) {
                println!("{line}");
            }
            self.printed = row.key + 1;
        }
    }

    async fn report_send(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Delivered { .. } => self.print_view().await,
            SendOutcome::Rejected(SendRejection::EmptyInput) => {}
            SendOutcome::Rejected(reason) => println!("! message not sent: {reason:?}"),
            SendOutcome::Failed(err) => {
                println!("! message not sent ({err}); type /retry to send it again")
            }
            SendOutcome::Discarded => {}
        }
    }
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}
