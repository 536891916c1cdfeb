pub mod error;

use chrono::{DateTime, Utc};
use error::{Error, Result};
use model::{Ballot, CloseRules, Question, QuestionResults, QuestionStatus, Variant, VariantTally};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;

pub use model;

/// Idempotent schema for the five poll entities. Foreign keys are enforced
/// on every connection; deleting a question cascades to its variants and
/// delivery records, deleting a user nulls out authored questions.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users ( \
        id INTEGER NOT NULL PRIMARY KEY, \
        chat_id INTEGER UNIQUE NOT NULL, \
        is_ready BOOLEAN NOT NULL DEFAULT TRUE \
    )",
    "CREATE TABLE IF NOT EXISTS questions ( \
        id INTEGER NOT NULL PRIMARY KEY, \
        author INTEGER, \
        text TEXT NOT NULL, \
        status INTEGER NOT NULL DEFAULT 0, \
        broadcast BOOLEAN NOT NULL DEFAULT FALSE, \
        end_time INTEGER NOT NULL, \
        min_votes INTEGER NOT NULL, \
        max_votes INTEGER NOT NULL, \
        FOREIGN KEY (author) REFERENCES users (id) ON DELETE SET NULL \
    )",
    "CREATE TABLE IF NOT EXISTS variants ( \
        id INTEGER NOT NULL PRIMARY KEY, \
        question_id INTEGER NOT NULL, \
        text TEXT NOT NULL, \
        votes_count INTEGER NOT NULL DEFAULT 0, \
        index_number INTEGER NOT NULL, \
        UNIQUE (question_id, index_number), \
        FOREIGN KEY (question_id) REFERENCES questions (id) ON DELETE CASCADE \
    )",
    "CREATE TABLE IF NOT EXISTS pending_questions ( \
        id INTEGER NOT NULL PRIMARY KEY, \
        user_id INTEGER NOT NULL, \
        question_id INTEGER NOT NULL, \
        UNIQUE (user_id, question_id), \
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE, \
        FOREIGN KEY (question_id) REFERENCES questions (id) ON DELETE CASCADE \
    )",
    "CREATE TABLE IF NOT EXISTS answered_questions ( \
        id INTEGER NOT NULL PRIMARY KEY, \
        user_id INTEGER NOT NULL, \
        question_id INTEGER NOT NULL, \
        UNIQUE (user_id, question_id), \
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE, \
        FOREIGN KEY (question_id) REFERENCES questions (id) ON DELETE CASCADE \
    )",
];

const QUESTION_COLUMNS: &str = "id, author, text, status, end_time, min_votes, max_votes";

fn question_from_row(row: &SqliteRow) -> Result<Question> {
    let status = QuestionStatus::from_i64(row.try_get("status")?).ok_or(Error::Fatal)?;
    let end_time = DateTime::from_timestamp(row.try_get("end_time")?, 0).ok_or(Error::Fatal)?;
    Ok(Question {
        id: row.try_get("id")?,
        author: row.try_get("author")?,
        text: row.try_get("text")?,
        status,
        rules: CloseRules {
            end_time,
            min_votes: row.try_get("min_votes")?,
            max_votes: row.try_get("max_votes")?,
        },
    })
}

fn variant_from_row(row: &SqliteRow) -> Result<Variant> {
    Ok(Variant {
        index: row.try_get("index_number")?,
        label: row.try_get("text")?,
        votes: row.try_get("votes_count")?,
    })
}

/// Handle to the poll store. Cheap to clone; all connections share one pool.
#[derive(Clone)]
pub struct Database(SqlitePool);

impl Database {
    /// Opens (creating if missing) the store at the given SQLite URL and
    /// applies the schema. A single pooled connection serializes writers,
    /// so every transaction below runs under exclusive access.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(Error::from)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// Throwaway store backed by `sqlite::memory:`.
    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.0).await?;
        }
        Ok(())
    }

    /// Resolves an external chat identity to an internal user id, creating
    /// the user on first contact. New users start out ready.
    pub async fn resolve_user(&self, chat_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO users (chat_id, is_ready) VALUES ($1, TRUE) \
             ON CONFLICT (chat_id) DO UPDATE SET chat_id = excluded.chat_id \
             RETURNING id",
        )
        .bind(chat_id)
        .fetch_one(&self.0)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn is_user_ready(&self, user: i64) -> Result<bool> {
        let row = sqlx::query("SELECT is_ready FROM users WHERE id = $1")
            .bind(user)
            .fetch_optional(&self.0)
            .await?
            .ok_or(Error::NotFound)?;
        Ok(row.try_get("is_ready")?)
    }

    /// Chat identities of every user eligible for the next broadcast.
    pub async fn ready_user_chat_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT chat_id FROM users WHERE is_ready ORDER BY id")
            .fetch_all(&self.0)
            .await?;
        rows.iter().map(|row| row.try_get("chat_id").map_err(Error::from)).collect()
    }

    /// Creates a draft question in `Editing` status and returns its id.
    pub async fn create_question(&self, author: i64, text: &str, rules: CloseRules) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO questions (author, text, status, end_time, min_votes, max_votes) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(author)
        .bind(text)
        .bind(QuestionStatus::Editing.as_i64())
        .bind(rules.end_time.timestamp())
        .bind(rules.min_votes)
        .bind(rules.max_votes)
        .fetch_one(&self.0)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn question(&self, question: i64) -> Result<Question> {
        let row = sqlx::query(&format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"))
            .bind(question)
            .fetch_optional(&self.0)
            .await?
            .ok_or(Error::NotFound)?;
        question_from_row(&row)
    }

    /// The author's draft, if one exists. At most one question per author may
    /// be in `Editing` status; the editing controller enforces this before
    /// creating a new draft.
    pub async fn editing_question_of(&self, author: i64) -> Result<Option<Question>> {
        let row = sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE author = $1 AND status = $2"
        ))
        .bind(author)
        .bind(QuestionStatus::Editing.as_i64())
        .fetch_optional(&self.0)
        .await?;
        row.as_ref().map(question_from_row).transpose()
    }

    /// Distinguishes a missing question from one in the wrong status after a
    /// status-guarded update matched no rows.
    async fn question_state_error(&self, question: i64) -> Error {
        match self.question(question).await {
            Ok(_) => Error::InvalidState,
            Err(err) => err,
        }
    }

    pub async fn set_question_text(&self, question: i64, text: &str) -> Result<()> {
        match sqlx::query("UPDATE questions SET text = $2 WHERE id = $1 AND status = $3")
            .bind(question)
            .bind(text)
            .bind(QuestionStatus::Editing.as_i64())
            .execute(&self.0)
            .await?
            .rows_affected()
        {
            1 => Ok(()),
            0 => Err(self.question_state_error(question).await),
            _ => Err(Error::Fatal),
        }
    }

    pub async fn set_close_rules(&self, question: i64, rules: CloseRules) -> Result<()> {
        match sqlx::query(
            "UPDATE questions SET end_time = $2, min_votes = $3, max_votes = $4 \
             WHERE id = $1 AND status = $5",
        )
        .bind(question)
        .bind(rules.end_time.timestamp())
        .bind(rules.min_votes)
        .bind(rules.max_votes)
        .bind(QuestionStatus::Editing.as_i64())
        .execute(&self.0)
        .await?
        .rows_affected()
        {
            1 => Ok(()),
            0 => Err(self.question_state_error(question).await),
            _ => Err(Error::Fatal),
        }
    }

    /// Replaces the draft's entire variant set: the old list is deleted and
    /// the new one inserted with fresh ballot positions, atomically.
    pub async fn replace_variants(&self, question: i64, labels: &[String]) -> Result<()> {
        let mut tx = self.0.begin().await?;
        let status: Option<i64> = sqlx::query_scalar("SELECT status FROM questions WHERE id = $1")
            .bind(question)
            .fetch_optional(&mut *tx)
            .await?;
        match status {
            None => return Err(Error::NotFound),
            Some(status) if status != QuestionStatus::Editing.as_i64() => return Err(Error::InvalidState),
            Some(_) => {}
        }

        sqlx::query("DELETE FROM variants WHERE question_id = $1").bind(question).execute(&mut *tx).await?;
        for (index, label) in labels.iter().enumerate() {
            sqlx::query(
                "INSERT INTO variants (question_id, text, votes_count, index_number) VALUES ($1, $2, 0, $3)",
            )
            .bind(question)
            .bind(label)
            .bind(index as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Ordered ballot for a question. Empty when the question has no variants
    /// (or does not exist; callers needing existence fetch the question).
    pub async fn variants(&self, question: i64) -> Result<Vec<Variant>> {
        let rows = sqlx::query(
            "SELECT index_number, text, votes_count FROM variants \
             WHERE question_id = $1 ORDER BY index_number",
        )
        .bind(question)
        .fetch_all(&self.0)
        .await?;
        rows.iter().map(variant_from_row).collect()
    }

    /// `Editing` -> `Open`. The commit half of publishing a draft; the
    /// broadcast fan-out follows as its own transaction.
    pub async fn open_question(&self, question: i64) -> Result<()> {
        match sqlx::query("UPDATE questions SET status = $2 WHERE id = $1 AND status = $3")
            .bind(question)
            .bind(QuestionStatus::Open.as_i64())
            .bind(QuestionStatus::Editing.as_i64())
            .execute(&self.0)
            .await?
            .rows_affected()
        {
            1 => Ok(()),
            0 => Err(self.question_state_error(question).await),
            _ => Err(Error::Fatal),
        }
    }

    /// Deletes a draft and, by cascade, its variants. Only drafts may be
    /// discarded; open and closed questions are part of poll history.
    pub async fn discard_question(&self, question: i64) -> Result<()> {
        match sqlx::query("DELETE FROM questions WHERE id = $1 AND status = $2")
            .bind(question)
            .bind(QuestionStatus::Editing.as_i64())
            .execute(&self.0)
            .await?
            .rows_affected()
        {
            1 => Ok(()),
            0 => Err(self.question_state_error(question).await),
            _ => Err(Error::Fatal),
        }
    }

    /// Enrolls every currently ready user as a pending respondent of an open
    /// question and flips them not-ready, atomically. Returns the chat
    /// identities to notify, in enrollment order. The enrolled set is exactly
    /// the snapshot taken here; users becoming ready afterwards wait for the
    /// next broadcast. The fan-out is recorded durably on the question row
    /// inside the same transaction (pending rows cannot stand in for it:
    /// an empty ready pool broadcasts to nobody), so a repeat call is
    /// rejected with `InvalidState` and can never enroll anyone twice.
    pub async fn broadcast(&self, question: i64) -> Result<Vec<i64>> {
        let mut tx = self.0.begin().await?;
        let row = sqlx::query("SELECT status, broadcast FROM questions WHERE id = $1")
            .bind(question)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound)?;
        if row.try_get::<i64, _>("status")? != QuestionStatus::Open.as_i64()
            || row.try_get::<bool, _>("broadcast")?
        {
            return Err(Error::InvalidState);
        }

        sqlx::query("UPDATE questions SET broadcast = TRUE WHERE id = $1")
            .bind(question)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("SELECT chat_id FROM users WHERE is_ready ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
        let chat_ids = rows
            .iter()
            .map(|row| row.try_get("chat_id").map_err(Error::from))
            .collect::<Result<Vec<i64>>>()?;

        sqlx::query("INSERT INTO pending_questions (user_id, question_id) SELECT id, $1 FROM users WHERE is_ready")
            .bind(question)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET is_ready = FALSE WHERE is_ready").execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(chat_ids)
    }

    /// Records one answer: increments the chosen variant's tally, consumes
    /// the pending delivery, inserts the answered record, and re-readies the
    /// user once no pending work remains. One transaction; on any failure no
    /// effect is applied. A pending row implies the question is still open,
    /// since closing purges all of its pending rows.
    pub async fn answer(&self, user: i64, question: i64, variant_index: i64) -> Result<()> {
        let mut tx = self.0.begin().await?;
        let pending: Option<i64> =
            sqlx::query_scalar("SELECT id FROM pending_questions WHERE user_id = $1 AND question_id = $2")
                .bind(user)
                .bind(question)
                .fetch_optional(&mut *tx)
                .await?;
        let pending = pending.ok_or(Error::NotPending)?;

        let tallied = sqlx::query(
            "UPDATE variants SET votes_count = votes_count + 1 \
             WHERE question_id = $1 AND index_number = $2",
        )
        .bind(question)
        .bind(variant_index)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if tallied != 1 {
            return Err(Error::InvalidVariant);
        }

        sqlx::query("DELETE FROM pending_questions WHERE id = $1").bind(pending).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO answered_questions (user_id, question_id) VALUES ($1, $2)")
            .bind(user)
            .bind(question)
            .execute(&mut *tx)
            .await?;

        let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM pending_questions WHERE user_id = $1")
            .bind(user)
            .fetch_one(&mut *tx)
            .await?;
        if remaining == 0 {
            sqlx::query("UPDATE users SET is_ready = TRUE WHERE id = $1").bind(user).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The oldest (by delivery order) question the user still owes an answer
    /// to, with its ordered variant labels. Pure read; safe to call
    /// repeatedly.
    pub async fn next_pending_question(&self, user: i64) -> Result<Option<Ballot>> {
        sqlx::query("SELECT id FROM users WHERE id = $1")
            .bind(user)
            .fetch_optional(&self.0)
            .await?
            .ok_or(Error::NotFound)?;

        let row = sqlx::query(
            "SELECT q.id AS id, q.text AS text FROM pending_questions p \
             JOIN questions q ON q.id = p.question_id \
             WHERE p.user_id = $1 ORDER BY p.id LIMIT 1",
        )
        .bind(user)
        .fetch_optional(&self.0)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let question: i64 = row.try_get("id")?;
        let variants = self.variants(question).await?;
        Ok(Some(Ballot {
            question,
            text: row.try_get("text")?,
            variants: variants.into_iter().map(|variant| variant.label).collect(),
        }))
    }

    /// Open questions that have either passed their deadline or reached
    /// their vote ceiling as of `now`.
    pub async fn due_questions(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            "SELECT q.id FROM questions q WHERE q.status = $1 AND (q.end_time <= $2 OR \
             (SELECT count(*) FROM answered_questions a WHERE a.question_id = q.id) >= q.max_votes) \
             ORDER BY q.id",
        )
        .bind(QuestionStatus::Open.as_i64())
        .bind(now.timestamp())
        .fetch_all(&self.0)
        .await
        .map_err(Error::from)
    }

    /// `Open` -> `Closed`. Purges the question's outstanding deliveries and
    /// returns every user with no pending work left to the ready pool, so a
    /// closing question never strands a subscriber. Returns the final result
    /// summary.
    pub async fn close_question(&self, question: i64) -> Result<QuestionResults> {
        let mut tx = self.0.begin().await?;
        match sqlx::query("UPDATE questions SET status = $2 WHERE id = $1 AND status = $3")
            .bind(question)
            .bind(QuestionStatus::Closed.as_i64())
            .bind(QuestionStatus::Open.as_i64())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        {
            1 => {}
            0 => return Err(self.status_error_in(&mut tx, question).await),
            _ => return Err(Error::Fatal),
        }

        sqlx::query("DELETE FROM pending_questions WHERE question_id = $1")
            .bind(question)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE users SET is_ready = TRUE WHERE NOT is_ready \
             AND NOT EXISTS (SELECT 1 FROM pending_questions p WHERE p.user_id = users.id)",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.question_results(question).await
    }

    async fn status_error_in(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        question: i64,
    ) -> Error {
        let exists: core::result::Result<Option<i64>, _> =
            sqlx::query_scalar("SELECT id FROM questions WHERE id = $1")
                .bind(question)
                .fetch_optional(&mut **tx)
                .await;
        match exists {
            Ok(Some(_)) => Error::InvalidState,
            Ok(None) => Error::NotFound,
            Err(err) => err.into(),
        }
    }

    /// Final tallies of a closed question. Results become readable only once
    /// the closing controller has sealed the question.
    pub async fn question_results(&self, question: i64) -> Result<QuestionResults> {
        let question = self.question(question).await?;
        if question.status != QuestionStatus::Closed {
            return Err(Error::InvalidState);
        }
        let variants = self.variants(question.id).await?;
        let respondents: i64 =
            sqlx::query_scalar("SELECT count(*) FROM answered_questions WHERE question_id = $1")
                .bind(question.id)
                .fetch_one(&self.0)
                .await?;
        Ok(QuestionResults {
            question: question.id,
            text: question.text,
            inconclusive: respondents < question.rules.min_votes,
            respondents,
            tallies: variants
                .into_iter()
                .map(|variant| VariantTally { label: variant.label, votes: variant.votes })
                .collect(),
        })
    }
}
