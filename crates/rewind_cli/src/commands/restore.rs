//! Restore commands.

use super::{format_timestamp, Context};
use rewind_core::{restore_from_backup, restore_from_timestamp};
use tracing::info;

/// Restores `target_branch` from the selected branch's backup at `timestamp`.
pub fn from_backup(
    ctx: &Context,
    target_branch: &str,
    timestamp: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    if target_branch == ctx.key.branch_id() {
        return Err("Target branch must differ from the source branch".into());
    }
    info!("Restoring {} from backup {}", target_branch, timestamp);

    let target = ctx.open_branch(target_branch)?;
    let point = restore_from_backup(&ctx.fs, &ctx.key, timestamp, &target)?;
    target.close()?;

    println!("✓ Branch restored from backup");
    println!("  Branch: {}", target_branch);
    println!("  Backup: {}", format_timestamp(timestamp));
    println!("  Pages: {}", point.page_count);
    println!("  New restore point: {}", format_timestamp(point.timestamp));

    Ok(())
}

/// Restores `target_branch` to the selected branch's restore point at
/// `timestamp`.
pub fn from_timestamp(
    ctx: &Context,
    target_branch: &str,
    timestamp: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring {} to restore point {}", target_branch, timestamp);

    let source = ctx.open()?;
    let target = ctx.open_branch(target_branch)?;
    restore_from_timestamp(&source, &target, timestamp, None)?;
    source.close()?;
    target.close()?;

    println!("✓ Branch restored to restore point");
    println!("  Branch: {}", target_branch);
    println!("  Restore point: {}", format_timestamp(timestamp));
    println!("  Pages: {}", target.page_count());

    Ok(())
}
