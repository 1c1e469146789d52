use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "quietbox",
    version,
    about = "End-to-end encrypted messages over a public key directory"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Key directory base URL (overrides ~/.quietbox/config.json)
    #[arg(long, global = true, env = "QUIETBOX_DIRECTORY_URL", value_name = "URL")]
    pub directory_url: Option<String>,

    /// Your user id at the key directory
    #[arg(long, global = true, env = "QUIETBOX_USER_ID", value_name = "USER")]
    pub user_id: Option<String>,

    /// Bearer credential for the key directory
    #[arg(long, global = true, env = "QUIETBOX_TOKEN", hide_env_values = true, hide = true)]
    pub token: Option<String>,

    /// Key store directory (default: ~/.quietbox/keys)
    #[arg(long, global = true, env = "QUIETBOX_STORE_DIR", value_name = "PATH")]
    pub store_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a local identity key and publish it to the directory
    Init(InitArgs),
    /// Show the current identity (key id, fingerprint)
    Whoami(WhoamiArgs),
    /// Show a user's published keys
    Lookup(LookupArgs),
    /// Encrypt a message for a user
    Seal(SealArgs),
    /// Decrypt an envelope addressed to you
    Open(OpenArgs),
    /// Export the identity key wrapped under a new backup code
    Backup(BackupArgs),
    /// Restore the identity key from a backup file
    Restore(RestoreArgs),
}

#[derive(Parser)]
pub struct InitArgs {
    /// Replace an existing identity without asking
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Create the key locally but do not publish it
    #[arg(long)]
    pub offline: bool,
}

#[derive(Parser)]
pub struct WhoamiArgs {
    /// Render the base64 SPKI public key as a QR code
    #[arg(long)]
    pub qr: bool,
}

#[derive(Parser)]
pub struct LookupArgs {
    /// User whose key to fetch
    #[arg(value_name = "USER")]
    pub user: String,

    /// Fetch a specific key id instead of the latest
    #[arg(long, value_name = "KEY_ID")]
    pub key_id: Option<String>,
}

#[derive(Parser)]
pub struct SealArgs {
    /// Recipient user id
    #[arg(value_name = "USER")]
    pub user: String,

    /// Message text (read from stdin if omitted)
    #[arg(value_name = "MESSAGE")]
    pub message: Option<String>,

    /// Encrypt to a specific published key id
    #[arg(long, value_name = "KEY_ID")]
    pub key_id: Option<String>,

    /// Keep retrying while the recipient has not published a key yet
    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser)]
pub struct OpenArgs {
    /// Envelope JSON file (use - or omit for stdin)
    #[arg(value_name = "FILE")]
    pub file: Option<String>,

    /// Decrypt with a specific stored key id instead of the current one
    #[arg(long, value_name = "KEY_ID")]
    pub key_id: Option<String>,
}

#[derive(Parser)]
pub struct BackupArgs {
    /// Write the backup package here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser)]
pub struct RestoreArgs {
    /// Backup package produced by `quietbox backup`
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Backup code (prompted for if omitted)
    #[arg(long, value_name = "CODE")]
    pub code: Option<String>,

    /// Skip publishing the restored key
    #[arg(long)]
    pub offline: bool,
}
