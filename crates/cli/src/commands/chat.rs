use std::future::{self, Future};

use datapac_agent::Answerer;
use datapac_core::errors::InterfaceError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::commands::CommandResult;

const EXIT_WORDS: [&str; 3] = ["sair", "exit", "quit"];

const BANNER: &str = "🤖 Data Pac - assistente de consultas de dados
==================================================
Posso ajudar você a:
- encontrar as tabelas certas para sua pergunta
- entender a estrutura dos dados
- executar consultas

Digite 'sair' para encerrar.
--------------------------------------------------";

pub async fn run_stdio<A>(answerer: &A) -> CommandResult
where
    A: Answerer + ?Sized,
{
    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            future::pending::<()>().await;
        }
    };
    match run_repl_until(answerer, input, &mut output, interrupt).await {
        Ok(()) => CommandResult { exit_code: 0, output: String::new() },
        Err(error) => CommandResult::failure("chat", "terminal_io", error.to_string(), 1),
    }
}

/// Reads questions line by line until an exit word or end of input.
/// A failed turn is reported and the loop goes on.
pub async fn run_repl<A, R, W>(answerer: &A, input: R, output: &mut W) -> std::io::Result<()>
where
    A: Answerer + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    run_repl_until(answerer, input, output, future::pending()).await
}

/// Like [`run_repl`], but `interrupt` resolving while waiting for input ends
/// the session the same way end of input does.
pub async fn run_repl_until<A, R, W, F>(
    answerer: &A,
    mut input: R,
    output: &mut W,
    interrupt: F,
) -> std::io::Result<()>
where
    A: Answerer + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    output.write_all(format!("{BANNER}\n").as_bytes()).await?;
    let mut buffer = Vec::new();

    loop {
        output.write_all("\nVocê: ".as_bytes()).await?;
        output.flush().await?;

        buffer.clear();
        let read = tokio::select! {
            read = input.read_until(b'\n', &mut buffer) => read?,
            () = &mut interrupt => 0,
        };
        if read == 0 {
            output.write_all("\n👋 Encerrando...\n".as_bytes()).await?;
            break;
        }

        // Undecodable bytes are replaced so one bad line cannot end the session.
        let line = String::from_utf8_lossy(&buffer);
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_word(question) {
            output.write_all("👋 Até logo!\n".as_bytes()).await?;
            break;
        }

        output.write_all("\n🔍 Processando sua pergunta...\n".as_bytes()).await?;
        let reply = match answerer.answer(question).await {
            Ok(answer) => format!("\n🤖 {answer}\n"),
            Err(error) => format!("\n{}\n", error_line(&error)),
        };
        output.write_all(reply.as_bytes()).await?;
    }

    output.flush().await
}

pub fn is_exit_word(input: &str) -> bool {
    let lowered = input.trim().to_lowercase();
    EXIT_WORDS.contains(&lowered.as_str())
}

pub fn error_line(error: &InterfaceError) -> String {
    format!("❌ Erro: {error} (correlation_id: {})", error.correlation_id())
}

#[cfg(test)]
mod tests {
    use super::is_exit_word;

    #[test]
    fn exit_words_ignore_case_and_padding() {
        assert!(is_exit_word("sair"));
        assert!(is_exit_word("  SAIR "));
        assert!(is_exit_word("Quit"));
        assert!(is_exit_word("exit"));
        assert!(!is_exit_word("sair agora"));
        assert!(!is_exit_word(""));
    }
}
