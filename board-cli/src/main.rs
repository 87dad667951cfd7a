//! Terminal front end for the message board.
//!
//! Reads one command per line from stdin:
//!
//! - `/post AUTHOR: CONTENT` appends a post
//! - `/show` prints every post as JSON
//! - `/quit` exits
//! - anything else replaces the text field
//!
//! After each command, every component that re-rendered prints its new view.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use atomstore_core::board::{BoardState, CharacterCount, PostCount, PostList, TextDisplay, TextInput};
use atomstore_core::{Store, StoreConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "board-cli", version, about = "Message board on a reactive atom store")]
struct Args {
    /// JSON store configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Text(String),
    Post { author: String, content: String },
    Show,
    Quit,
    Invalid(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.split_once(' ') {
            Some(("/post", rest)) => match rest.split_once(':') {
                Some((author, content)) if !author.trim().is_empty() => Command::Post {
                    author: author.trim().to_string(),
                    content: content.trim().to_string(),
                },
                _ => Command::Invalid("usage: /post AUTHOR: CONTENT".into()),
            },
            _ => match line {
                "/show" => Command::Show,
                "/quit" => Command::Quit,
                "/post" => Command::Invalid("usage: /post AUTHOR: CONTENT".into()),
                other if other.starts_with('/') => Command::Invalid(format!("unknown command {other}")),
                other => Command::Text(other.to_string()),
            },
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

/// Every component of the board, mounted on one store.
struct Board {
    input: TextInput,
    display: TextDisplay,
    count: CharacterCount,
    list: PostList,
    total: PostCount,
    /// Render counts already printed, per display component.
    printed: [usize; 4],
}

impl Board {
    fn mount(store: &Store, state: &BoardState) -> atomstore_core::Result<Self> {
        Ok(Self {
            input: TextInput::mount(store, state)?,
            display: TextDisplay::mount(store, state)?,
            count: CharacterCount::mount(store, state)?,
            list: PostList::mount(store, state)?,
            total: PostCount::mount(store, state)?,
            printed: [0; 4],
        })
    }

    fn print_updates(&mut self, out: &mut impl Write) -> io::Result<()> {
        let renders = [
            self.display.renders(),
            self.count.renders(),
            self.list.renders(),
            self.total.renders(),
        ];
        if renders[0] != self.printed[0] {
            writeln!(out, "[display] {}", self.display.rendered())?;
        }
        if renders[1] != self.printed[1] {
            writeln!(out, "[count]   {} characters", self.count.rendered())?;
        }
        if renders[2] != self.printed[2] {
            for line in self.list.rendered() {
                writeln!(out, "[posts]   {line}")?;
            }
        }
        if renders[3] != self.printed[3] {
            writeln!(out, "[total]   {} posts", self.total.rendered())?;
        }
        self.printed = renders;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args.log);

    let config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let store = Store::with_config(config);
    let state = BoardState::install(&store)?;
    let mut board = Board::mount(&store, &state)?;
    tracing::info!(nodes = store.len(), "board mounted");

    let stdin = io::stdin();
    let mut out = io::stdout().lock();

    for line in stdin.lock().lines() {
        match Command::parse(&line?) {
            Command::Quit => break,
            Command::Text(text) => board.input.type_text(text)?,
            Command::Post { author, content } => {
                board.list.add_post(author, content)?;
            }
            Command::Show => {
                let posts = store.read(&state.posts)?;
                writeln!(out, "{}", serde_json::to_string_pretty(&posts)?)?;
            }
            Command::Invalid(reason) => writeln!(out, "error: {reason}")?,
        }
        board.print_updates(&mut out)?;
    }

    Ok(())
}
