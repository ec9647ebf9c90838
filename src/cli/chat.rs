//! Line-oriented chat front end.
//!
//! Reads intents from stdin and renders stream updates as they arrive.
//! Input is accepted while a reply streams; a new message interrupts it.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::auth::open_credential_store;
use crate::core::app::{App, StreamUpdate};
use crate::core::chat_stream::StreamOutcome;
use crate::core::client::ApiClient;
use crate::core::config::{ChatSettings, Config};

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Stop,
    History,
    Key,
    Edit { index: usize, content: &'a str },
    Invalid(&'static str),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(trimmed);
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => Input::Quit,
        "stop" => Input::Stop,
        "history" => Input::History,
        "key" => Input::Key,
        "edit" => {
            let Some((index, content)) = rest.split_once(char::is_whitespace) else {
                return Input::Invalid("Usage: /edit N new text");
            };
            match index.parse::<usize>() {
                Ok(index) => Input::Edit {
                    index,
                    content: content.trim(),
                },
                Err(_) => Input::Invalid("Usage: /edit N new text"),
            }
        }
        _ => Input::Invalid("Unknown command"),
    }
}

fn print_prompt(app: &App) -> io::Result<()> {
    if app.is_generating() {
        return Ok(());
    }
    let mut stdout = io::stdout();
    if app.settings_open() {
        write!(stdout, "API key> ")?;
    } else {
        write!(stdout, "> ")?;
    }
    stdout.flush()
}

fn print_history(app: &App) {
    for (index, message) in app.messages().iter().enumerate() {
        println!("[{index}] {}: {}", message.role.as_str(), message.content);
    }
}

fn render_update(update: StreamUpdate) -> io::Result<()> {
    let mut stdout = io::stdout();
    match update {
        StreamUpdate::Ignored => {}
        StreamUpdate::Delta(text) => {
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
        StreamUpdate::Finished {
            outcome,
            credential_reset,
        } => {
            match outcome {
                StreamOutcome::Completed => writeln!(stdout)?,
                StreamOutcome::Cancelled => writeln!(stdout, " [stopped]")?,
                StreamOutcome::Failed(failure) => {
                    writeln!(stdout)?;
                    eprintln!("❌ {failure}");
                }
            }
            if credential_reset {
                eprintln!("The API key was rejected. Enter a new one to continue.");
            }
        }
    }
    Ok(())
}

async fn handle_credential_line(app: &mut App, line: &str) {
    let trimmed = line.trim();
    if trimmed.starts_with('/') {
        if !app.close_settings() {
            println!("An API key is required before chatting.");
        }
        return;
    }

    println!("Validating...");
    match app.submit_credential(trimmed).await {
        Ok(true) => println!("✅ API key saved."),
        Ok(false) => {}
        Err(_) => {
            if let Some(message) = app.credential_error() {
                eprintln!("❌ {message}");
            }
        }
    }
}

/// Returns `false` when the user asked to leave.
fn handle_chat_line(app: &mut App, line: &str) -> bool {
    match parse_input(line) {
        Input::Quit => return false,
        Input::Stop => {
            if !app.cancel() {
                println!("Nothing is generating.");
            }
        }
        Input::History => print_history(app),
        Input::Key => app.open_settings(),
        Input::Edit { index, content } => {
            if !app.messages().get(index).is_some_and(|m| m.is_user()) {
                println!("Message {index} is not one of your messages.");
            } else {
                match app.edit(index, content) {
                    Ok(true) => println!("(regenerating from message {index})"),
                    Ok(false) => {}
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
        }
        Input::Invalid(message) => println!("{message}"),
        Input::Message(content) => {
            if app.is_generating() && !content.is_empty() {
                println!(" [interrupted]");
            }
            app.send(content);
        }
    }
    true
}

pub async fn run_chat(config: &Config, settings: ChatSettings) -> Result<(), Box<dyn Error>> {
    let credentials = open_credential_store(config)?;
    let client = ApiClient::new(settings)?;
    let model = client.settings().model.clone();
    let (mut app, mut rx) = App::new(client, credentials);

    println!("parley · {model} · type /quit to leave");
    if app.settings_open() {
        println!("No API key configured.");
    }
    print_prompt(&app)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if app.settings_open() {
                    if line.trim() == "/quit" {
                        break;
                    }
                    handle_credential_line(&mut app, &line).await;
                } else if !handle_chat_line(&mut app, &line) {
                    break;
                }
                print_prompt(&app)?;
            }
            Some((message, stream_id)) = rx.recv() => {
                let update = app.handle_stream_message(message, stream_id);
                let finished = matches!(update, StreamUpdate::Finished { .. });
                render_update(update)?;
                if finished {
                    print_prompt(&app)?;
                }
            }
        }
    }

    app.cancel();
    Ok(())
}
