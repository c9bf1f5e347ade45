pub mod answer_sync;
pub mod api_client;
pub mod exam_session;
pub mod highlight;
pub mod integrity_guard;
pub mod section_cache;
pub mod section_timer;

pub use answer_sync::AnswerSync;
pub use api_client::{ExamApi, HttpExamApi};
pub use exam_session::{AdvanceOutcome, ExamSession, SessionDeps, SessionPhase, SessionPrompt};
pub use highlight::HighlightEngine;
pub use integrity_guard::IntegrityGuard;
pub use section_timer::SectionTimer;
