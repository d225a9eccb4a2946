//! 课程引擎：步骤推进与结业考试

pub mod exam;
pub mod steps;

pub use exam::{ExamEngine, ExamOutcome, ExamResult, ExamSession, QuestionView};
pub use steps::{QuizOutcome, QuizView, StepEngine, StepEntry, StepView};
