//! `auth` / `deauth` commands and credential store selection.

use std::error::Error;
use std::io::{self, Write};

use tracing::warn;

use crate::core::client::ApiClient;
use crate::core::config::io::project_dirs;
use crate::core::config::{ChatSettings, Config, CredentialStoreKind};
use crate::core::credential::{CredentialBackend, CredentialStore, FileBackend, KeyringBackend};

const CREDENTIALS_FILE: &str = "credentials.toml";

pub fn credential_backend(config: &Config) -> Result<Box<dyn CredentialBackend>, Box<dyn Error>> {
    Ok(match config.credential_store_kind() {
        CredentialStoreKind::Keyring => Box::new(KeyringBackend::new()),
        CredentialStoreKind::File => {
            let dirs = project_dirs()?;
            Box::new(FileBackend::new(dirs.data_dir().join(CREDENTIALS_FILE)))
        }
    })
}

/// Open the configured store. A keyring that is temporarily unavailable
/// yields an empty store rather than an error.
pub fn open_credential_store(config: &Config) -> Result<CredentialStore, Box<dyn Error>> {
    match CredentialStore::load(credential_backend(config)?) {
        Ok(store) => Ok(store),
        Err(err) if err.is_recoverable() => {
            warn!("Keyring unavailable, continuing without a stored key: {err}");
            Ok(CredentialStore::empty(credential_backend(config)?))
        }
        Err(err) => Err(err.into()),
    }
}

fn prompt_api_key() -> io::Result<String> {
    print!("Enter your API key: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub async fn run_auth(config: &Config, settings: ChatSettings) -> Result<(), Box<dyn Error>> {
    let mut store = open_credential_store(config)?;
    let client = ApiClient::new(settings)?;

    let secret = prompt_api_key()?;
    if secret.is_empty() {
        return Err("API key cannot be empty".into());
    }

    println!("Validating...");
    if let Err(err) = store.set(&secret, &client).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }

    println!("✅ API key stored in {}", store.backend_description());
    Ok(())
}

pub fn run_deauth(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut store = open_credential_store(config)?;
    let had_key = store.is_configured();
    store.clear()?;
    if had_key {
        println!("✅ API key removed from {}", store.backend_description());
    } else {
        println!("No API key was stored.");
    }
    Ok(())
}
