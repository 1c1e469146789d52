use std::io::IsTerminal;

use owo_colors::{OwoColorize, Stream::Stdout};

use quietbox::config::config_path;
use quietbox::keys::fingerprint::short_fingerprint;
use quietbox::record::decode_b64;

use super::Context;
use crate::cli::{GlobalArgs, InitArgs};

pub fn run_init(global: &GlobalArgs, args: InitArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    let keys = ctx.engine.keys();

    // ── 1. Overwrite guard ───────────────────────────────────────────────
    if let Some(existing) = keys.current_key_id()? {
        if !args.yes {
            if !std::io::stdin().is_terminal() {
                eprintln!("Use --yes to replace the existing identity in non-interactive mode");
                return Ok(());
            }
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Identity {} already exists. Messages sealed to it will no longer open. Replace?",
                    existing
                ))
                .default(false)
                .interact()
                .map_err(|e| anyhow::anyhow!("prompt failed: {}", e))?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
        }
    }

    // ── 2. Generate, and publish unless offline ──────────────────────────
    let key_id = if args.offline {
        keys.generate_and_store_key_pair()?
    } else {
        ctx.require_online()?;
        let user_id = ctx.user_id()?;
        let record = ctx.engine.rotate_identity(user_id)?;
        ctx.config.save_to(&config_path()?)?;
        record.key_id
    };

    // ── 3. Summary ───────────────────────────────────────────────────────
    let spki = decode_b64("public key", &keys.exported_public_key(&key_id)?)?;
    println!(
        "{}",
        "Identity key generated.".if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("Key id:      {}", key_id);
    println!("Fingerprint: {}", short_fingerprint(&spki));
    println!(
        "Key store:   {}{}",
        ctx.store_dir.display(),
        if ctx.sealed { " (passphrase-protected)" } else { "" }
    );
    if args.offline {
        println!();
        println!("Not published. Run 'quietbox init --yes' with a directory configured to publish.");
    } else if let Some(url) = &ctx.config.directory_url {
        println!("Published:   {}", url);
    }

    Ok(())
}
