use crate::{error::Result, Engine};
use chrono::{DateTime, Utc};
use model::QuestionResults;
use std::time::Duration;

/// Closing controller.
impl Engine {
    /// One closing pass as of `now`: every open question past its deadline
    /// or at its vote ceiling is closed, each in its own store transaction.
    /// Returns the result summaries of the questions closed by this pass.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<QuestionResults>> {
        let due = self.db.due_questions(now).await?;
        let mut closed = Vec::with_capacity(due.len());
        for question in due {
            match self.db.close_question(question).await {
                Ok(results) => {
                    log::info!(
                        "closed question {question} with {} respondents{}",
                        results.respondents,
                        if results.inconclusive { " (inconclusive)" } else { "" },
                    );
                    closed.push(results);
                }
                // Another session closed or deleted it between the scan and now.
                Err(db::error::Error::InvalidState | db::error::Error::NotFound) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(closed)
    }

    pub async fn sweep(&self) -> Result<Vec<QuestionResults>> {
        self.sweep_at(Utc::now()).await
    }

    /// Periodic closing sweep, independent of user-triggered calls. Runs
    /// until the owning task is dropped; individual sweep failures are
    /// logged and do not stop the loop.
    pub async fn run_sweeper(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = self.sweep().await {
                log::error!("closing sweep failed: {err}");
            }
        }
    }

    /// Final tallies, total respondents, and the inconclusive flag of a
    /// closed question.
    pub async fn question_results(&self, question: i64) -> Result<QuestionResults> {
        Ok(self.db.question_results(question).await?)
    }
}
