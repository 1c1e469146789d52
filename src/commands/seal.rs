use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use owo_colors::{OwoColorize, Stream::Stderr};

use quietbox::QuietboxError;

use super::{read_input, Context};
use crate::cli::{GlobalArgs, SealArgs};

pub fn run_seal(global: &GlobalArgs, args: SealArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    ctx.require_online()?;
    ctx.engine.keys().require_current_key_id().map_err(|_| {
        anyhow::anyhow!("No identity found. Run 'quietbox init' first.")
    })?;

    let message = match args.message {
        Some(message) => message,
        None => read_input(None)?,
    };

    let seal_once = || match &args.key_id {
        Some(key_id) => ctx.engine.encrypt_for_key(&args.user, key_id, &message),
        None => ctx.engine.encrypt_for(&args.user, &message),
    };

    // Only a missing recipient key is worth waiting for.
    let envelope = if args.wait {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(8);
        seal_once
            .retry(backoff)
            .sleep(std::thread::sleep)
            .when(|e: &QuietboxError| e.is_retryable())
            .notify(|_, delay: Duration| {
                eprintln!(
                    "{}",
                    format!("{} has not published a key yet, retrying in {:?}", args.user, delay)
                        .if_supports_color(Stderr, |t| t.dimmed())
                );
            })
            .call()
            .map_err(|e| anyhow::anyhow!("Failed to seal for {}: {}", args.user, e))?
    } else {
        seal_once().map_err(|e| match e {
            QuietboxError::KeyNotFound(_) => anyhow::anyhow!(
                "{} has not published a key. Retry later or pass --wait.",
                args.user
            ),
            other => other.into(),
        })?
    };

    println!("{}", envelope.to_json()?);

    Ok(())
}
