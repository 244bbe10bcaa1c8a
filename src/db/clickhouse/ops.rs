use anyhow::Context;
use log::{info, warn};
use time::Date;

use crate::db::{
    clickhouse::client::ClickhouseClient,
    models::{HistoricalFact, HistoricalFactRow},
};
use crate::scd::DestinationStatus;

/// Result of appending one date's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { rows: u64 },
    /// The date already has rows; nothing was written
    AlreadyPresent { existing: u64 },
    /// No rows to write
    Empty,
}

/// Every row of an append batch must carry the batch date; the duplicate
/// check only looks at that one date.
pub fn check_batch_date(date: Date, facts: &[HistoricalFact]) -> anyhow::Result<()> {
    if let Some(other) = facts.iter().find(|f| f.date != date) {
        anyhow::bail!(
            "Fact for pool {} dated {} in append batch for {}",
            other.pool_id,
            other.date,
            date
        );
    }
    Ok(())
}

impl ClickhouseClient {
    /// Best-effort view of the facts table for mode selection.
    pub async fn destination_status(&self) -> anyhow::Result<DestinationStatus> {
        let exists = self
            .client
            .query("SELECT count() FROM system.tables WHERE database = currentDatabase() AND name = ?")
            .bind(&self.facts_table)
            .fetch_one::<u64>()
            .await
            .context("Failed to look up facts table")?;

        if exists == 0 {
            return Ok(DestinationStatus::Absent);
        }

        let rows = self
            .client
            .query(&format!("SELECT count() FROM {}", self.facts_table))
            .fetch_one::<u64>()
            .await
            .context("Failed to count facts table rows")?;

        Ok(if rows == 0 {
            DestinationStatus::Empty
        } else {
            DestinationStatus::Populated { rows }
        })
    }

    /// Rows already loaded for `date`.
    pub async fn count_rows_for_date(&self, date: Date) -> anyhow::Result<u64> {
        let count = self
            .client
            .query(&format!(
                "SELECT count() FROM {} WHERE date = toDate(?)",
                self.facts_table
            ))
            .bind(date.to_string())
            .fetch_one::<u64>()
            .await
            .with_context(|| format!("Failed to count rows for {}", date))?;
        Ok(count)
    }

    /// Replace the whole facts table with `facts`.
    ///
    /// Rows are written to the staging table first and swapped in with
    /// `EXCHANGE TABLES`, so a failed load leaves the live table untouched.
    pub async fn replace_facts(&self, facts: &[HistoricalFact]) -> anyhow::Result<u64> {
        let staging = self.staging_table();

        self.client
            .query(&format!(
                "CREATE TABLE IF NOT EXISTS {} AS {}",
                staging, self.facts_table
            ))
            .execute()
            .await
            .context("Failed to create staging table")?;
        self.client
            .query(&format!("TRUNCATE TABLE {}", staging))
            .execute()
            .await
            .context("Failed to truncate staging table")?;

        let written = self.insert_rows(&staging, facts).await?;

        self.client
            .query(&format!(
                "EXCHANGE TABLES {} AND {}",
                self.facts_table, staging
            ))
            .execute()
            .await
            .context("Failed to swap staging table into place")?;

        // Staging now holds the previous contents
        if let Err(e) = self
            .client
            .query(&format!("TRUNCATE TABLE {}", staging))
            .execute()
            .await
        {
            warn!("[FACTS] Failed to clear staging table after swap: {:#}", e);
        }

        info!(
            "[FACTS] Replaced {} with {} rows",
            self.facts_table, written
        );
        Ok(written)
    }

    /// Append one date's rows unless the date is already loaded.
    pub async fn append_facts_for_date(
        &self,
        date: Date,
        facts: &[HistoricalFact],
    ) -> anyhow::Result<AppendOutcome> {
        if facts.is_empty() {
            return Ok(AppendOutcome::Empty);
        }

        check_batch_date(date, facts)?;

        let existing = self.count_rows_for_date(date).await?;
        if existing > 0 {
            warn!(
                "[FACTS] {} already has {} rows for {}, skipping append",
                self.facts_table, existing, date
            );
            return Ok(AppendOutcome::AlreadyPresent { existing });
        }

        let rows = self.insert_rows(&self.facts_table, facts).await?;
        info!(
            "[FACTS] Appended {} rows for {} to {}",
            rows, date, self.facts_table
        );
        Ok(AppendOutcome::Inserted { rows })
    }

    async fn insert_rows(&self, table: &str, facts: &[HistoricalFact]) -> anyhow::Result<u64> {
        let mut inserter = self
            .client
            .inserter::<HistoricalFactRow>(table)
            .with_max_rows(self.insert_batch_size);

        for fact in facts {
            inserter
                .write(&HistoricalFactRow::from(fact))
                .await
                .with_context(|| format!("Failed to write fact row to {}", table))?;
            inserter
                .commit()
                .await
                .with_context(|| format!("Failed to flush fact rows to {}", table))?;
        }

        let stats = inserter
            .end()
            .await
            .with_context(|| format!("Failed to finish insert into {}", table))?;

        if stats.rows != facts.len() as u64 {
            warn!(
                "[FACTS] Inserter reported {} rows for {} written facts",
                stats.rows,
                facts.len()
            );
        }

        Ok(facts.len() as u64)
    }
}
