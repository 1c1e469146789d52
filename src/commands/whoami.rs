use quietbox::keys::fingerprint::{fingerprint, short_fingerprint};
use quietbox::record::decode_b64;

use super::Context;
use crate::cli::{GlobalArgs, WhoamiArgs};

fn try_copy_to_clipboard(text: &str) -> bool {
    match arboard::Clipboard::new() {
        Ok(mut clipboard) => clipboard.set_text(text).is_ok(),
        Err(_) => false,
    }
}

pub fn run_whoami(global: &GlobalArgs, args: WhoamiArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    let keys = ctx.engine.keys();
    let key_id = keys
        .current_key_id()?
        .ok_or_else(|| anyhow::anyhow!("No identity found. Run 'quietbox init' first."))?;
    let public_key = keys.exported_public_key(&key_id)?;
    let spki = decode_b64("public key", &public_key)?;
    let full = fingerprint(&spki);

    println!("User:        {}", ctx.config.user_id.as_deref().unwrap_or("(not set)"));
    println!("Key id:      {}", key_id);
    println!("Fingerprint: {}", short_fingerprint(&spki));
    println!("             {}", full);
    println!(
        "Directory:   {}",
        ctx.config.directory_url.as_deref().unwrap_or("(offline)")
    );
    println!("Key store:   {}", ctx.store_dir.display());
    println!();

    if try_copy_to_clipboard(&full) {
        println!("Fingerprint copied to clipboard.");
    } else {
        println!("(Clipboard unavailable, copy the fingerprint manually)");
    }

    if args.qr {
        println!();
        qr2term::print_qr(&public_key)
            .map_err(|e| anyhow::anyhow!("QR code render failed: {}", e))?;
    }

    Ok(())
}
