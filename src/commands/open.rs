use owo_colors::{OwoColorize, Stream::Stderr};

use quietbox::record::EncryptedMessage;
use quietbox::QuietboxError;

use super::{read_input, Context};
use crate::cli::{GlobalArgs, OpenArgs};

pub fn run_open(global: &GlobalArgs, args: OpenArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    let raw = read_input(args.file.as_deref())?;
    let envelope = EncryptedMessage::from_json(raw.trim())?;

    let result = match &args.key_id {
        Some(key_id) => ctx.engine.cipher().decrypt_with_key_id(&envelope, key_id),
        None => ctx.engine.decrypt(&envelope),
    };

    match result {
        Ok(plaintext) => {
            println!("{}", plaintext);
            Ok(())
        }
        Err(QuietboxError::Decryption) => {
            eprintln!(
                "{}",
                "Error: cannot open this message. It was altered, or sealed to a key you no longer use."
                    .if_supports_color(Stderr, |t| t.red())
            );
            anyhow::bail!("decryption failed")
        }
        Err(e) => Err(e.into()),
    }
}
