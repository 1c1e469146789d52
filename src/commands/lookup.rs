use comfy_table::{Cell, Color, Table};

use quietbox::keys::fingerprint::short_fingerprint;
use quietbox::util::{human_duration, now_secs};

use super::Context;
use crate::cli::{GlobalArgs, LookupArgs};

pub fn run_lookup(global: &GlobalArgs, args: LookupArgs) -> anyhow::Result<()> {
    let ctx = Context::build(global)?;
    ctx.require_online()?;
    let directory = ctx.engine.directory();

    let latest = directory.get_latest_key(&args.user)?;
    let record = match &args.key_id {
        Some(key_id) => directory.get_key(&args.user, key_id)?,
        None => latest.clone(),
    };
    let is_latest = record.key_id == latest.key_id;

    let mut table = Table::new();
    table.set_header(vec!["User", "Key id", "Fingerprint", "Age", "Latest"]);
    table.add_row(vec![
        Cell::new(&record.user_id),
        Cell::new(&record.key_id),
        Cell::new(short_fingerprint(&record.public_key_der()?)),
        Cell::new(human_duration(now_secs().saturating_sub(record.created_at))),
        if is_latest {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Yellow)
        },
    ]);

    println!("{table}");

    Ok(())
}
