//! Backup commands.

use super::{format_timestamp, Context};
use rewind_core::{list_backups, Backup, BackupInfo, BackupLocks};
use tracing::info;

/// Backs up the selected branch at `timestamp`, or at its latest restore
/// point when none is given.
pub fn create(
    ctx: &Context,
    timestamp: Option<i64>,
    max_part_size: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ctx.open()?;
    let timestamp = match timestamp {
        Some(timestamp) => timestamp,
        None => {
            store
                .latest_restore_point()?
                .ok_or("Database has no restore point to back up")?
                .timestamp
        }
    };
    info!("Backing up {} at {}", ctx.key, timestamp);

    let config = match max_part_size {
        Some(size) => ctx.config.clone().max_part_size(size),
        None => ctx.config.clone(),
    };
    config.validate()?;

    let backup = Backup::new(ctx.fs.clone(), ctx.key.clone(), timestamp, &config);
    let locks = BackupLocks::new();
    let point = backup.run(&locks, &store)?;
    store.close()?;

    let info = backup.to_info()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => {
            println!("✓ Backup created successfully");
            println!("  Directory: {:?}", backup.directory());
            println!("  Pages: {}", point.page_count);
            print_info(&info);
        }
    }

    Ok(())
}

/// Lists the backups of the selected branch.
pub fn list(ctx: &Context, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let infos = list_backups(&ctx.fs, &ctx.key, &ctx.config)?
        .iter()
        .map(Backup::to_info)
        .collect::<Result<Vec<_>, _>>()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&infos)?),
        _ => {
            println!("Backups for {}", ctx.key);
            println!("===========");
            for info in &infos {
                print_info(info);
            }
            println!("Total: {}", infos.len());
        }
    }

    Ok(())
}

fn print_info(info: &BackupInfo) {
    println!("  Restore point: {}", format_timestamp(info.restore_point));
    println!("  Parts: {}", info.parts);
    println!("  Size: {} bytes", info.size);
}
