//! The farm chat command line: an HTTP relay server and a terminal chat.

#[macro_use]
extern crate tracing;

use std::io::Write as _;

use chrono::Local;
use clap::{Parser, Subcommand};
use farm_chat::core::{LocationContext, UpstreamClient};
use farm_chat::server::{self, ServerState};
use farm_chat::{SessionBuilder, SessionConfig, VoiceSettings, export};
use farm_chat_gateway::{GatewayConfigBuilder, GatewayProvider};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::net::TcpListener;

const BAR_CHAR: &str = "▎";

#[derive(Parser)]
#[command(name = "farm-chat", version)]
struct Cli {
    /// Bearer credential for the upstream gateway.
    #[arg(long, env = "FARM_CHAT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the upstream gateway.
    #[arg(long, env = "FARM_CHAT_BASE_URL")]
    base_url: Option<String>,

    /// Model to ask for.
    #[arg(long, env = "FARM_CHAT_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serves the relay endpoint over HTTP.
    Serve {
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Chats in the terminal.
    Chat {
        #[arg(long)]
        city: Option<String>,
        /// Temperature in degrees Celsius.
        #[arg(long, default_value_t = 0.0)]
        temperature: f64,
        /// Readable weather condition, e.g. "Partly Cloudy".
        #[arg(long)]
        condition: Option<String>,
        /// Relative humidity in percent.
        #[arg(long, default_value_t = 0)]
        humidity: u8,
        #[arg(long, default_value = "en-US")]
        language: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let upstream = cli.api_key.map(|api_key| {
        let mut builder = GatewayConfigBuilder::with_api_key(api_key);
        if let Some(base_url) = cli.base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(model) = cli.model {
            builder = builder.with_model(model);
        }
        UpstreamClient::new(GatewayProvider::new(builder.build()))
    });

    match cli.command {
        Command::Serve { port } => serve(upstream, port).await,
        Command::Chat {
            city,
            temperature,
            condition,
            humidity,
            language,
        } => {
            let Some(upstream) = upstream else {
                eprintln!("FARM_CHAT_API_KEY environment variable is not set");
                return;
            };
            let defaults = LocationContext::default();
            let config = SessionConfig {
                voice: VoiceSettings {
                    language,
                    ..Default::default()
                },
                location: LocationContext {
                    city: city.unwrap_or(defaults.city),
                    temperature: temperature.round() as i32,
                    condition: condition.unwrap_or(defaults.condition),
                    humidity,
                },
            };
            chat(upstream, config).await;
        }
    }
}

async fn serve(upstream: Option<UpstreamClient>, port: u16) {
    let state = match upstream {
        Some(upstream) => ServerState::new(upstream),
        None => {
            warn!("FARM_CHAT_API_KEY is not configured");
            ServerState::unconfigured("FARM_CHAT_API_KEY is not configured")
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind port {port}: {err}");
            return;
        }
    };
    info!("listening on {port}");
    if let Err(err) = axum::serve(listener, server::router(state)).await {
        error!("server stopped: {err}");
    }
}

async fn chat(upstream: UpstreamClient, config: SessionConfig) {
    let mut session = SessionBuilder::with_upstream(upstream)
        .with_config(config)
        .build();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/new" => {
                session.start_new_chat();
                continue;
            }
            "/share" => {
                println!("{}", export::share_text(session.transcript()));
                continue;
            }
            "/save" => {
                save_transcript(session.transcript());
                continue;
            }
            _ => {}
        }

        print!("{}🌾 ", BAR_CHAR.bright_green());
        let mut printed = 0;
        let result = session
            .send_message(line, false, false, move |text: &str| {
                let delta = &text[printed..];
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
                printed = text.len();
            })
            .await;
        println!();

        match result {
            Ok(reply) => {
                if !reply.turn.message.is_saved() {
                    println!("{}", "(reply not saved)".dimmed());
                }
            }
            Err(farm_chat::Error::Relay(err)) => {
                let kind = err.kind();
                println!(
                    "{}{} {}",
                    BAR_CHAR.bright_red(),
                    kind.notice_title().bold(),
                    kind.notice_description()
                );
            }
            Err(err) => {
                println!("{}{err}", BAR_CHAR.bright_red());
            }
        }
    }
}

fn save_transcript(turns: &[farm_chat_model::Turn]) {
    if turns.is_empty() {
        return;
    }
    let file_name = export::download_file_name(Local::now().date_naive());
    match std::fs::write(&file_name, export::download_text(turns)) {
        Ok(()) => println!("saved to {file_name}"),
        Err(err) => error!("failed to save {file_name}: {err}"),
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
