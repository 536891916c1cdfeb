use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The author already has a draft in progress.
    DraftExists,
    /// The author has no draft to edit, commit, or discard.
    NoDraft,
    /// The draft fails the readiness predicate and cannot be committed.
    NotReady,
    NotFound,
    InvalidState,
    NotPending,
    InvalidVariant,
    Constraint,
    Fatal,
}

impl From<db::error::Error> for Error {
    fn from(err: db::error::Error) -> Self {
        use db::error::Error as Db;
        match err {
            Db::NotFound => Self::NotFound,
            Db::InvalidState => Self::InvalidState,
            Db::NotPending => Self::NotPending,
            Db::InvalidVariant => Self::InvalidVariant,
            Db::Constraint => Self::Constraint,
            Db::Fatal => Self::Fatal,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DraftExists => "You are already editing a question. Commit or discard it first.",
            Self::NoDraft => "You have no question in progress.",
            Self::NotReady => "The question is not ready to be published yet.",
            Self::NotFound => "Unknown user or question.",
            Self::InvalidState => "The question does not allow that operation anymore.",
            Self::NotPending => "You have no answer owed for that question.",
            Self::InvalidVariant => "That answer is not on the ballot.",
            Self::Constraint => "The operation conflicts with existing poll records.",
            Self::Fatal => "We encountered an unexpected storage error on our end.",
        })
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
