use chrono::NaiveDate;
use tracing::{debug, info};

use super::{Pipeline, RunReport};
use crate::error::PipelineError;

impl Pipeline {
    /// Recovers dates for stored deals whose news_date is missing or out of range.
    pub async fn run_backfill_dates(&self, today: NaiveDate, report: &mut RunReport) -> Result<(), PipelineError> {
        let Some(dates) = &self.dates else {
            return Err(PipelineError::MissingConfig("date recovery".to_string()));
        };
        let rows = self.store.list_needing_dates(today).await?;
        info!("{} deals need a publication date", rows.len());

        for row in rows {
            self.cancel.check()?;
            let Some(url) = row.news_url.as_deref() else {
                debug!("Deal {} has no news_url, skipping", row.id);
                continue;
            };
            let Some(date) = dates.resolve(row.news_date, url, None, today).await else {
                debug!("No date recovered for deal {}", row.id);
                continue;
            };
            if Some(date) == row.news_date {
                continue;
            }
            match self.store.update_news_date(row.id, date, today).await {
                Ok(true) => {
                    report.dates_updated += 1;
                    info!("Deal {} dated {}", row.id, date);
                }
                Ok(false) => {}
                Err(e) => report.record_error("store", &e),
            }
        }
        Ok(())
    }
}
