pub mod ability;
pub mod answer;
pub mod candidates;
pub mod error;
pub mod mastery;
pub mod selector;
pub mod session;

pub use answer::{submit_answer, AnswerOutcome, SubmitAnswer};
pub use error::{EngineError, EngineResult};
pub use session::{
    end_session, next_question, session_progress, start_session, NextQuestion, SessionProgress,
    StartSession,
};
