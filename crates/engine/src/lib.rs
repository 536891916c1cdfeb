pub mod error;

mod broadcast;
mod closing;
mod editing;
mod voting;

use error::Result;

pub use db::{model, Database};

/// The poll lifecycle engine: editing, broadcast, voting, and closing
/// controllers over a shared entity store. The chat transport and dialog
/// layers drive it through these methods and handle all message delivery
/// themselves. Cheap to clone; one clone per chat session is the expected
/// caller shape.
#[derive(Clone)]
pub struct Engine {
    db: Database,
    min_variants: usize,
}

impl Engine {
    /// Smallest ballot that makes for a meaningful poll.
    pub const DEFAULT_MIN_VARIANTS: usize = 2;

    pub fn new(db: Database) -> Self {
        Self { db, min_variants: Self::DEFAULT_MIN_VARIANTS }
    }

    /// Policy knob for how many variants a draft needs before it may commit.
    pub fn with_min_variants(mut self, min_variants: usize) -> Self {
        self.min_variants = min_variants;
        self
    }

    /// Maps an external chat identity to an internal user id, creating the
    /// user on first contact. Idempotent.
    pub async fn resolve_user(&self, chat_id: i64) -> Result<i64> {
        Ok(self.db.resolve_user(chat_id).await?)
    }

    /// Readiness query for menu-rendering decisions.
    pub async fn is_user_ready(&self, user: i64) -> Result<bool> {
        Ok(self.db.is_user_ready(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::{error::Error, Database, Engine};
    use chrono::{Duration, Utc};
    use model::CloseRules;

    fn rules(hours_from_now: i64, min_votes: i64, max_votes: i64) -> CloseRules {
        CloseRules { end_time: Utc::now() + Duration::hours(hours_from_now), min_votes, max_votes }
    }

    fn labels(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| String::from(*label)).collect()
    }

    async fn engine() -> Engine {
        Engine::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_poll_lifecycle() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        let voter = engine.resolve_user(11).await.unwrap();
        let straggler = engine.resolve_user(22).await.unwrap();

        engine.start_draft(author, "Pick one", rules(1, 1, 2)).await.unwrap();
        engine.set_variants(author, &labels(&["A", "B"])).await.unwrap();

        // Everyone was ready, so everyone gets enrolled.
        let notified = engine.commit(author).await.unwrap();
        assert_eq!(notified, vec![1, 11, 22]);
        assert!(!engine.is_user_ready(voter).await.unwrap());

        let ballot = engine.next_pending_question(voter).await.unwrap().unwrap();
        assert_eq!(ballot.text, "Pick one");
        assert_eq!(ballot.variants, vec!["A", "B"]);

        engine.answer(voter, ballot.question, 0).await.unwrap();
        assert!(engine.is_user_ready(voter).await.unwrap());
        assert!(!engine.is_user_ready(straggler).await.unwrap());
        assert_eq!(engine.answer(voter, ballot.question, 0).await.unwrap_err(), Error::NotPending);

        engine.answer(author, ballot.question, 1).await.unwrap();

        // Two answers reached the ceiling; the sweep closes the question.
        let closed = engine.sweep().await.unwrap();
        assert_eq!(closed.len(), 1);
        let results = &closed[0];
        assert_eq!(results.question, ballot.question);
        assert_eq!(results.respondents, 2);
        assert!(!results.inconclusive);
        assert_eq!(results.tallies[0].votes, 1);
        assert_eq!(results.tallies[1].votes, 1);

        // The straggler's stale delivery is gone and they are ready again.
        assert_eq!(engine.next_pending_question(straggler).await.unwrap(), None);
        assert!(engine.is_user_ready(straggler).await.unwrap());

        let summary = engine.question_results(ballot.question).await.unwrap();
        assert_eq!(summary, *results);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn one_draft_per_author() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        engine.start_draft(author, "First", rules(1, 1, 2)).await.unwrap();
        assert_eq!(
            engine.start_draft(author, "Second", rules(1, 1, 2)).await.unwrap_err(),
            Error::DraftExists,
        );

        // Another author is unaffected.
        let other = engine.resolve_user(2).await.unwrap();
        engine.start_draft(other, "Theirs", rules(1, 1, 2)).await.unwrap();

        // Discarding makes room for a new draft.
        engine.discard(author).await.unwrap();
        engine.start_draft(author, "Second", rules(1, 1, 2)).await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn commit_requires_a_ready_draft() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();

        engine.start_draft(author, "Pick one", rules(1, 1, 2)).await.unwrap();
        // No variants yet.
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NotReady);

        // One variant is below the meaningful-poll minimum.
        engine.set_variants(author, &labels(&["A"])).await.unwrap();
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NotReady);

        engine.set_variants(author, &labels(&["A", "B"])).await.unwrap();

        // A deadline in the past cannot be committed either.
        engine.set_rules(author, rules(-1, 1, 2)).await.unwrap();
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NotReady);
        // Nor inverted vote bounds.
        engine.set_rules(author, rules(1, 3, 2)).await.unwrap();
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NotReady);
        // Nor a zero vote ceiling, which would close on the next sweep.
        engine.set_rules(author, rules(1, 0, 0)).await.unwrap();
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NotReady);

        engine.set_rules(author, rules(1, 1, 2)).await.unwrap();
        let notified = engine.commit(author).await.unwrap();
        assert_eq!(notified, vec![1]);

        // The draft is spent; editing commands no longer find one.
        assert_eq!(engine.set_text(author, "Other").await.unwrap_err(), Error::NoDraft);
        assert_eq!(engine.commit(author).await.unwrap_err(), Error::NoDraft);
        assert_eq!(engine.discard(author).await.unwrap_err(), Error::NoDraft);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn editing_commands_need_a_draft() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        assert_eq!(engine.set_text(author, "Pick one").await.unwrap_err(), Error::NoDraft);
        assert_eq!(engine.set_variants(author, &labels(&["A"])).await.unwrap_err(), Error::NoDraft);
        assert_eq!(engine.set_rules(author, rules(1, 1, 2)).await.unwrap_err(), Error::NoDraft);
        assert_eq!(engine.discard(author).await.unwrap_err(), Error::NoDraft);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rebroadcast_is_rejected() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        engine.start_draft(author, "Pick one", rules(1, 1, 5)).await.unwrap();
        engine.set_variants(author, &labels(&["A", "B"])).await.unwrap();
        let notified = engine.commit(author).await.unwrap();
        assert_eq!(notified.len(), 1);

        let question = engine.next_pending_question(author).await.unwrap().unwrap().question;
        assert_eq!(engine.broadcast(question).await.unwrap_err(), Error::InvalidState);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_snapshot_commit_is_not_rebroadcast() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        engine.start_draft(author, "First", rules(1, 1, 5)).await.unwrap();
        engine.set_variants(author, &labels(&["A", "B"])).await.unwrap();
        engine.commit(author).await.unwrap();

        // Committed while the only user still owes the first question.
        let first = engine.next_pending_question(author).await.unwrap().unwrap().question;
        let second = engine.start_draft(author, "Second", rules(1, 1, 5)).await.unwrap();
        engine.set_variants(author, &labels(&["C", "D"])).await.unwrap();
        assert_eq!(engine.commit(author).await.unwrap(), Vec::<i64>::new());

        engine.answer(author, first, 0).await.unwrap();
        assert!(engine.is_user_ready(author).await.unwrap());

        // Becoming ready after the snapshot earns no retroactive enrollment.
        assert_eq!(engine.broadcast(second).await.unwrap_err(), Error::InvalidState);
        assert_eq!(engine.next_pending_question(author).await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn deadline_sweep_flags_inconclusive() {
        let engine = engine().await;
        let author = engine.resolve_user(1).await.unwrap();
        let voter = engine.resolve_user(22).await.unwrap();
        engine.start_draft(author, "Pick one", rules(1, 2, 5)).await.unwrap();
        engine.set_variants(author, &labels(&["A", "B"])).await.unwrap();
        let notified = engine.commit(author).await.unwrap();
        assert_eq!(notified, vec![1, 22]);

        let question = engine.next_pending_question(author).await.unwrap().unwrap().question;
        engine.answer(author, question, 0).await.unwrap();

        // Nothing due before the deadline.
        assert!(engine.sweep().await.unwrap().is_empty());
        assert_eq!(engine.question_results(question).await.unwrap_err(), Error::InvalidState);

        let closed = engine.sweep_at(Utc::now() + Duration::hours(2)).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].inconclusive);
        assert_eq!(closed[0].respondents, 1);
        assert!(engine.is_user_ready(voter).await.unwrap());

        // Votes arriving after the close have nowhere to land.
        assert_eq!(engine.answer(voter, question, 0).await.unwrap_err(), Error::NotPending);
        // Closed results remain queryable, partial tallies intact.
        let summary = engine.question_results(question).await.unwrap();
        assert!(summary.inconclusive);
        assert_eq!(summary.tallies[0].votes, 1);
    }
}
