//! Simple single-file migration format
//!
//! Migrations are loaded from one embedded sql file. Every migration starts with a line comment
//! that carries its version and description:
//! ```text
//! --##1 initial schema
//! ```
//! Each following migration must increase the version by one.
use std::{borrow::Cow, future::Future, pin::Pin};

use sqlx::{
    error::BoxDynError,
    migrate::{Migration, MigrationSource, MigrationType},
};

#[derive(Debug)]
pub struct MigrationScript<'s> {
    data: &'s str,
}

impl<'s> MigrationScript<'s> {
    fn parse(&self) -> Result<Vec<Migration>, BoxDynError> {
        // (version, description, sql), the checksum is computed once the sql is complete
        let mut parts: Vec<(i64, String, String)> = Vec::new();

        for line in self.data.lines() {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix("--##") {
                let version_end = header.find(' ').unwrap_or(header.len());
                let (version_str, description_str) = header.split_at(version_end);
                let version = match version_str.parse() {
                    Ok(v) => v,
                    Err(e) => Err(format!(
                        "cannot parse version of migration as int, got string '{version_str}', error: {e}"
                    ))?,
                };
                parts.push((version, description_str.trim().to_string(), String::new()));
                continue;
            }

            let (_, _, sql) = match parts.last_mut() {
                Some(v) => v,
                None => {
                    // allow comments at beginning of file
                    if line.starts_with("--") {
                        continue;
                    }
                    Err(format!(
                        "migration script does not start with migration header, got: {line}"
                    ))?
                }
            };
            sql.push_str(line);
            sql.push('\n');
        }

        Ok(parts
            .into_iter()
            .map(|(version, description, sql)| {
                Migration::new(
                    version,
                    Cow::Owned(description),
                    MigrationType::Simple,
                    Cow::Owned(sql),
                )
            })
            .collect())
    }
}

impl<'s> MigrationSource<'s> for MigrationScript<'s> {
    fn resolve(
        self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Migration>, BoxDynError>> + Send + 's>> {
        Box::pin(async move { self.parse() })
    }
}

pub fn postgresql_migrations() -> MigrationScript<'static> {
    MigrationScript {
        data: include_str!("./sql/migrations.pg.sql"),
    }
}
