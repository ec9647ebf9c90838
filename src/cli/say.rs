//! TUI-less "say" command

use std::error::Error;
use std::io::{self, Write};

use tokio_util::sync::CancellationToken;

use crate::cli::auth::open_credential_store;
use crate::core::chat_stream::{stream_chat, StreamOutcome};
use crate::core::client::ApiClient;
use crate::core::config::{ChatSettings, Config};
use crate::core::message::Message;

pub async fn run_say(
    config: &Config,
    settings: ChatSettings,
    prompt: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    let prompt = prompt.trim();
    if prompt.is_empty() {
        eprintln!("Usage: parley say <prompt>");
        std::process::exit(1);
    }

    let store = open_credential_store(config)?;
    let Some(api_key) = store.get() else {
        eprintln!("❌ No API key configured. Run 'parley auth' first.");
        std::process::exit(1);
    };

    let client = ApiClient::new(settings)?;
    let transcript = [Message::user(prompt)];
    let cancel = CancellationToken::new();

    let mut stdout = io::stdout();
    let outcome = stream_chat(&client, api_key, &transcript, &cancel, |text| {
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    })
    .await;

    match outcome {
        StreamOutcome::Completed | StreamOutcome::Cancelled => {
            println!();
            Ok(())
        }
        StreamOutcome::Failed(failure) => {
            eprintln!("\n\n❌ Error: {failure}");
            if failure.is_credential_error() {
                eprintln!("Run 'parley auth' to store a new API key.");
            }
            std::process::exit(1);
        }
    }
}
