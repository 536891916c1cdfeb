use crate::{error::Result, Engine};

/// Broadcast controller.
impl Engine {
    /// Fans a freshly committed question out to the current ready pool:
    /// one pending delivery per user, each flipped to not-ready, in a single
    /// store transaction. Returns the chat identities to notify; sending the
    /// messages is the transport layer's job. Repeating the call for an
    /// already-broadcast question fails with `InvalidState`, so a retry can
    /// never enroll anyone twice.
    pub async fn broadcast(&self, question: i64) -> Result<Vec<i64>> {
        let chat_ids = self.db.broadcast(question).await?;
        log::info!("question {question} broadcast to {} users", chat_ids.len());
        Ok(chat_ids)
    }
}
