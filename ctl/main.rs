#![forbid(unsafe_code)]

//! `toolwire-ctl`, the command-line client for `toolwire`.
//!
//! Streams one chat turn from the server, feeds every received chunk to a
//! [`GenerationSession`] and prints the prose as it grows, followed by the
//! tool invocations with their status and duration.

use std::collections::HashMap;
use std::io::Write;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use toolwire::frame::codec::MAX_LINE_BYTES;
use toolwire::invocation::session::GenerationSession;
use toolwire::invocation::{InvocationStatus, ToolInvocation};
use toolwire::marker::MarkerEvent;
use toolwire::model::ChatMessage;
use toolwire::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "toolwire-ctl",
    about = "Command-line client for the toolwire server",
    version,
    long_about = None
)]
struct Cli {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a prompt and render the streamed answer.
    Chat {
        /// User prompt.
        prompt: String,
        /// Session id sent to the server for log correlation.
        #[arg(long)]
        session_id: Option<String>,
        /// Print the decoded view as JSON instead of rendering it.
        #[arg(long)]
        json: bool,
        /// Longest frame line accepted; longer lines are skipped.
        #[arg(long, default_value_t = MAX_LINE_BYTES)]
        max_line_bytes: usize,
    },

    /// Check that the server is up.
    Health,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let base = args.url.trim_end_matches('/').to_owned();
    match args.command {
        Command::Health => {
            let body = reqwest::get(format!("{base}/health")).await?.text().await?;
            println!("{body}");
            Ok(())
        }
        Command::Chat {
            prompt,
            session_id,
            json,
            max_line_bytes,
        } => {
            let opts = ChatOptions {
                session_id,
                json,
                max_line_bytes,
            };
            chat(&base, prompt, opts).await
        }
    }
}

struct ChatOptions {
    session_id: Option<String>,
    json: bool,
    max_line_bytes: usize,
}

async fn chat(base: &str, prompt: String, opts: ChatOptions) -> Result<()> {
    let ChatOptions {
        session_id,
        json,
        max_line_bytes,
    } = opts;
    let resp = reqwest::Client::new()
        .post(format!("{base}/chat"))
        .json(&serde_json::json!({
            "messages": [ChatMessage::user(prompt)],
            "session_id": session_id,
        }))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Http(format!("server returned {status}: {body}")));
    }

    let mut session = GenerationSession::with_max_line_bytes(max_line_bytes);
    let mut render = Renderer::new(!json);
    let mut body = resp.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if session.push_chunk(&chunk)? {
            render.update(&session);
        }
    }
    session.end_of_stream()?;
    render.update(&session);

    if json {
        let view = serde_json::to_string_pretty(session.view())
            .map_err(|e| AppError::Io(format!("cannot render view: {e}")))?;
        println!("{view}");
        return Ok(());
    }

    render.summary(&session);
    Ok(())
}

/// Incremental terminal rendering of a session.
struct Renderer {
    enabled: bool,
    printed: String,
    statuses: HashMap<String, InvocationStatus>,
    events_seen: usize,
}

impl Renderer {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            printed: String::new(),
            statuses: HashMap::new(),
            events_seen: 0,
        }
    }

    fn update(&mut self, session: &GenerationSession) {
        if !self.enabled {
            return;
        }
        let view = session.view();

        // Prose only ever grows at the end, except while an unfinished
        // marker tag is still visible; wait for it to resolve.
        if let Some(fresh) = view
            .text
            .strip_prefix(self.printed.as_str())
            .filter(|s| !s.is_empty())
        {
            print!("{fresh}");
            let _ = std::io::stdout().flush();
            self.printed.push_str(fresh);
        }

        for inv in &view.invocations {
            if self.statuses.get(&inv.id) != Some(&inv.status) {
                self.statuses.insert(inv.id.clone(), inv.status);
                eprintln!("\n[{}] {}", status_label(inv.status), call_label(inv));
            }
        }

        for event in view.events.iter().skip(self.events_seen) {
            eprintln!("\n{}", event_label(event));
        }
        self.events_seen = view.events.len();
    }

    fn summary(&self, session: &GenerationSession) {
        let view = session.view();
        println!();
        for err in &view.errors {
            eprintln!("error: {err}");
        }
        if !view.invocations.is_empty() {
            println!("\nTools:");
            for inv in &view.invocations {
                let took = inv
                    .duration()
                    .map(|d| format!(" ({} ms)", d.num_milliseconds()))
                    .unwrap_or_default();
                let detail = match inv.status {
                    InvocationStatus::Failed => {
                        format!(": {}", inv.error.as_deref().unwrap_or_default())
                    }
                    _ => String::new(),
                };
                println!(
                    "  {:<10} {}{took}{detail}",
                    status_label(inv.status),
                    call_label(inv)
                );
            }
        }
        if session.skipped_lines() > 0 {
            eprintln!("({} malformed or oversized lines skipped)", session.skipped_lines());
        }
        match view.finish_reason {
            Some(reason) => println!("\n[finished: {reason}]"),
            None => println!("\n[stream ended without finish]"),
        }
    }
}

fn status_label(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Declared => "declared",
        InvocationStatus::Executing => "running",
        InvocationStatus::Completed => "done",
        InvocationStatus::Failed => "failed",
    }
}

fn call_label(inv: &ToolInvocation) -> String {
    format!("{}@{}", inv.tool, inv.server)
}

fn event_label(event: &MarkerEvent) -> String {
    match event {
        MarkerEvent::SearchResults(search) => {
            let mut out = format!("[search] {}", search.query);
            for hit in &search.results {
                out.push_str(&format!("\n  - {} <{}>", hit.title, hit.url));
            }
            out
        }
        MarkerEvent::MediaGenerationStarted(media) => {
            format!("[media] {:?} generation started: {}", media.media, media.prompt)
        }
        MarkerEvent::OptionsPrompt(options) => {
            let mut out = format!("[options] {}", options.question);
            for (n, option) in options.options.iter().enumerate() {
                out.push_str(&format!("\n  {}. {option}", n + 1));
            }
            out
        }
        other => format!("[{}]", other.kind().name()),
    }
}
