use crate::{
    error::{Error, Result},
    Engine,
};
use chrono::Utc;
use model::{CloseRules, Question};

/// Question editing controller. The draft is the author's single
/// `Editing`-status question; every command below is keyed by the author id
/// the dialog layer supplies, so no session state lives in the process.
impl Engine {
    /// Opens a new draft with its initial text and closing rules. Rejected
    /// while the author still has a draft in progress.
    pub async fn start_draft(&self, author: i64, text: &str, rules: CloseRules) -> Result<i64> {
        if self.db.editing_question_of(author).await?.is_some() {
            return Err(Error::DraftExists);
        }
        let question = self.db.create_question(author, text, rules).await?;
        log::debug!("user {author} started draft {question}");
        Ok(question)
    }

    pub async fn set_text(&self, author: i64, text: &str) -> Result<()> {
        let draft = self.draft_of(author).await?;
        Ok(self.db.set_question_text(draft.id, text).await?)
    }

    /// Replaces the draft's entire ordered variant list.
    pub async fn set_variants(&self, author: i64, labels: &[String]) -> Result<()> {
        let draft = self.draft_of(author).await?;
        Ok(self.db.replace_variants(draft.id, labels).await?)
    }

    pub async fn set_rules(&self, author: i64, rules: CloseRules) -> Result<()> {
        let draft = self.draft_of(author).await?;
        Ok(self.db.set_close_rules(draft.id, rules).await?)
    }

    /// Publishes the draft: checks readiness, flips it to `Open`, and hands
    /// off to the broadcast controller. Returns the chat identities the
    /// transport layer must notify.
    pub async fn commit(&self, author: i64) -> Result<Vec<i64>> {
        let draft = self.draft_of(author).await?;
        let variants = self.db.variants(draft.id).await?;
        if !draft.is_ready(variants.len(), self.min_variants, Utc::now()) {
            return Err(Error::NotReady);
        }
        self.db.open_question(draft.id).await?;
        log::info!("user {author} committed question {}", draft.id);
        self.broadcast(draft.id).await
    }

    /// Deletes the draft and its variants. Open questions are unaffected.
    pub async fn discard(&self, author: i64) -> Result<()> {
        let draft = self.draft_of(author).await?;
        self.db.discard_question(draft.id).await?;
        log::debug!("user {author} discarded draft {}", draft.id);
        Ok(())
    }

    async fn draft_of(&self, author: i64) -> Result<Question> {
        self.db.editing_question_of(author).await?.ok_or(Error::NoDraft)
    }
}
