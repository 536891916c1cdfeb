#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Unknown user, question, or variant reference.
    NotFound,
    /// The question is not in the status the operation requires.
    InvalidState,
    /// No delivery is owed for this (user, question) pair.
    NotPending,
    /// Variant index outside the question's ballot range.
    InvalidVariant,
    /// Uniqueness or referential-integrity violation surfaced by the store.
    Constraint,
    /// Unrecoverable storage failure.
    Fatal,
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(err) if err.is_unique_violation() || err.is_foreign_key_violation() => {
                Self::Constraint
            }
            _ => Self::Fatal,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
