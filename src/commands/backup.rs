use std::io::IsTerminal;

use anyhow::Context as _;
use owo_colors::{OwoColorize, Stream::Stderr, Stream::Stdout};
use zeroize::Zeroizing;

use quietbox::keys::store::write_item_atomic;
use quietbox::record::PasswordPackage;
use quietbox::QuietboxError;

use super::Context;
use crate::cli::{BackupArgs, GlobalArgs, RestoreArgs};

pub fn run_backup(global: &GlobalArgs, args: BackupArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    let code = Zeroizing::new(ctx.engine.vault().generate_backup_code()?);
    let package = ctx.engine.export_backup(&code)?;
    let json = package.to_json()?;

    match &args.out {
        Some(path) => {
            write_item_atomic(path, json.as_bytes())
                .with_context(|| format!("Failed to write backup to {}", path.display()))?;
            println!("Backup written to {}", path.display());
        }
        None => println!("{}", json),
    }

    // The code is shown once and never stored.
    eprintln!();
    eprintln!(
        "Backup code: {}",
        code.as_str().if_supports_color(Stderr, |t| t.bold())
    );
    eprintln!("Write it down. Without it the backup cannot be restored.");

    Ok(())
}

pub fn run_restore(global: &GlobalArgs, args: RestoreArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let package = PasswordPackage::from_json(raw.trim())?;

    let code = match args.code {
        Some(code) => Zeroizing::new(code),
        None => {
            if !std::io::stdin().is_terminal() {
                anyhow::bail!("Pass --code to restore in non-interactive mode");
            }
            Zeroizing::new(
                dialoguer::Password::new()
                    .with_prompt("Backup code")
                    .interact()
                    .map_err(|e| anyhow::anyhow!("Backup code prompt failed: {}", e))?,
            )
        }
    };

    let key_id = match ctx.engine.restore_backup(&package, &code) {
        Ok(key_id) => key_id,
        Err(QuietboxError::Authentication) => {
            anyhow::bail!("Incorrect backup code, or the backup file is damaged")
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{}",
        "Identity restored.".if_supports_color(Stdout, |t| t.green())
    );
    println!("Key id:      {}", key_id);

    if !args.offline && ctx.config.is_online() {
        let record = ctx.engine.publish_identity(ctx.user_id()?)?;
        println!("Published:   {} as {}", record.key_id, record.user_id);
    }

    Ok(())
}
