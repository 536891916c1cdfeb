use crate::{error::Result, Engine};
use model::Ballot;

/// Voting controller.
impl Engine {
    /// Records the user's answer to a question they owe a delivery for.
    /// Tally increment, delivery consumption, answered record, and the
    /// conditional return to the ready pool land atomically; a rejected
    /// answer leaves no trace.
    pub async fn answer(&self, user: i64, question: i64, variant_index: i64) -> Result<()> {
        self.db.answer(user, question, variant_index).await?;
        log::debug!("user {user} answered question {question} with variant {variant_index}");
        Ok(())
    }

    /// The oldest question the user has yet to answer, with its ordered
    /// variant labels, or `None` when nothing is owed. Pure read; the dialog
    /// layer may call it as often as it likes.
    pub async fn next_pending_question(&self, user: i64) -> Result<Option<Ballot>> {
        Ok(self.db.next_pending_question(user).await?)
    }
}
