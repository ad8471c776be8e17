use sarpras_db::migrations;

use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    let result = with_database("migrate", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))
    });

    match result {
        Ok(versions) => {
            let latest = versions.last().map(i64::to_string).unwrap_or_else(|| "none".into());
            CommandResult::success(
                "migrate",
                format!("applied pending migrations; schema version {latest}"),
            )
        }
        Err(failure) => failure,
    }
}
