use datapac_agent::Answerer;

use crate::commands::chat::error_line;
use crate::commands::CommandResult;

pub async fn run<A>(answerer: &A, question: &str) -> CommandResult
where
    A: Answerer + ?Sized,
{
    let question = question.trim();
    if question.is_empty() {
        return CommandResult::failure("ask", "empty_question", "question must not be empty", 2);
    }

    match answerer.answer(question).await {
        Ok(answer) => CommandResult { exit_code: 0, output: answer },
        Err(error) => CommandResult { exit_code: 1, output: error_line(&error) },
    }
}
