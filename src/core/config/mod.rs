pub mod data;
pub mod io;


pub use data::{ChatSettings, Config, CredentialStoreKind, SettingError};
pub use io::ConfigError;
