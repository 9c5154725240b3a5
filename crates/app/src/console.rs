//! Line-oriented driver for one session in the terminal.

use std::sync::Arc;

use exam_core::model::{AnswerValue, FinalizeReason, OptionId, QuestionType};
use services::{
    EngineSettings, SessionController, SessionError, SessionRunner, SessionSnapshot,
    SessionStatus,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

const HELP: &str = "\
commands:
  <n>          select option n (toggles for multiple choice)
  t <text>     type an answer (true/false, numerical, essay)
  n | p        next / previous question
  g <index>    go to question index in the active section
  c            check the current answer (practice)
  f            finish the active section
  s            submit
  continue     keep working after time is up (marked late)
  now          submit after time is up
  r            retry a failed submission
  q            abandon and quit";

enum Command {
    Select(u64),
    Text(String),
    Next,
    Previous,
    Goto(usize),
    Check,
    FinishSection,
    Submit,
    Continue,
    FinishNow,
    Retry,
    Quit,
    Help,
}

fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let cmd = match head {
        "t" => Command::Text(rest.trim().to_owned()),
        "n" => Command::Next,
        "p" => Command::Previous,
        "g" => Command::Goto(rest.trim().parse().ok()?),
        "c" => Command::Check,
        "f" => Command::FinishSection,
        "s" => Command::Submit,
        "continue" => Command::Continue,
        "now" => Command::FinishNow,
        "r" => Command::Retry,
        "q" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        other => Command::Select(other.parse().ok()?),
    };
    Some(cmd)
}

fn render(snapshot: &SessionSnapshot) {
    println!();
    print!("[{}] {}/{} answered", snapshot.status, snapshot.answered, snapshot.total);
    if let Some(left) = snapshot.overall_remaining_seconds {
        print!("  total {}:{:02}", left / 60, left % 60);
    }
    if let Some(left) = snapshot.section_remaining_seconds {
        print!("  section {}:{:02}", left / 60, left % 60);
    }
    if snapshot.late {
        print!("  LATE");
    }
    println!();

    for section in &snapshot.sections {
        let marker = match (section.active, section.locked) {
            (true, _) => ">",
            (_, true) => "x",
            _ => " ",
        };
        println!(
            " {marker} {} ({}/{})",
            section.name, section.answered, section.question_count
        );
    }

    if let (Some(nav), Some(q)) = (snapshot.navigator, &snapshot.current) {
        println!("\nQ{} [{}] {}", nav.index, q.question_type.as_str(), q.prompt);
        for option in &q.options {
            println!("  {}. {}", option.id, option.label);
        }
        if let Some(answer) = &q.answer {
            println!("  answer: {answer:?}");
        }
        if let Some(words) = q.word_count {
            println!("  words: {words}");
        }
        if let Some(checked) = &q.checked {
            match checked.correct {
                Some(true) => println!("  correct"),
                Some(false) => println!("  wrong"),
                None => println!("  awaiting review"),
            }
            if let Some(explanation) = &checked.explanation {
                println!("  {explanation}");
            }
        }
    }

    if let Some(results) = &snapshot.results {
        let t = results.tally;
        println!(
            "\nresult: {} correct, {} wrong, {} skipped, {} pending of {}",
            t.correct(),
            t.wrong(),
            t.skipped(),
            t.pending(),
            t.total()
        );
        if let Some(score) = results.score {
            println!("score: {score}");
        }
    }
    if let Some(error) = &snapshot.error {
        println!("\nsubmission failed: {error} (type r to retry)");
    }
    if snapshot.status == SessionStatus::TimeUp {
        println!("\ntime is up: type `continue` or `now`");
    }
}

async fn apply(session: &mut SessionController, cmd: Command) -> Result<(), SessionError> {
    let current = session.attempt().current_question().map(|q| (q.id(), q.question_type()));
    match cmd {
        Command::Select(option) => {
            if let Some((id, _)) = current {
                session.select_option(id, OptionId::new(option))?;
            }
        }
        Command::Text(text) => match current {
            Some((id, QuestionType::TrueFalse)) => {
                let value = matches!(text.to_ascii_lowercase().as_str(), "t" | "true" | "yes" | "y");
                session.record_answer(id, AnswerValue::TrueFalse(value))?;
            }
            Some((id, _)) => session.set_text(id, text)?,
            None => {}
        },
        Command::Next => {
            session.next()?;
        }
        Command::Previous => {
            session.previous()?;
        }
        Command::Goto(index) => {
            session.navigate(None, index)?;
        }
        Command::Check => {
            if let Some((id, _)) = current {
                session.check(id).await?;
            }
        }
        Command::FinishSection => {
            if let Some(active) = session.attempt().sections().active_id() {
                session.finish_section(active).await?;
            }
        }
        Command::Submit => {
            session.request_finalize(FinalizeReason::Manual).await?;
        }
        Command::Continue => session.continue_after_time_up()?,
        Command::FinishNow => {
            session.finish_now().await?;
        }
        Command::Retry => {
            session.retry().await?;
        }
        Command::Quit => {
            if session.is_ticking() {
                session.abandon()?;
            }
        }
        Command::Help => println!("{HELP}"),
    }
    Ok(())
}

/// Run the session until it completes, is abandoned, or stdin closes.
pub async fn drive(
    session: SessionController,
    settings: EngineSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Arc::new(Mutex::new(session));
    let runner = SessionRunner::spawn(Arc::clone(&session), settings.tick_interval);

    println!("{HELP}");
    render(&session.lock().await.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(cmd) = parse(&line) else {
            println!("unrecognized input; type h for help");
            continue;
        };
        let quit = matches!(cmd, Command::Quit);

        let mut guard = session.lock().await;
        if let Err(err) = apply(&mut guard, cmd).await {
            debug!(error = %err, "command failed");
            println!("! {err}");
        }
        render(&guard.snapshot());

        let done = guard.status().is_terminal();
        drop(guard);
        if quit || done {
            break;
        }
    }

    runner.stop();
    let mut guard = session.lock().await;
    if guard.is_ticking() {
        guard.abandon()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert!(matches!(parse("2"), Some(Command::Select(2))));
        assert!(matches!(parse("g 3"), Some(Command::Goto(3))));
        assert!(matches!(parse("t 1.41"), Some(Command::Text(t)) if t == "1.41"));
        assert!(matches!(parse(" continue "), Some(Command::Continue)));
        assert!(parse("g x").is_none());
        assert!(parse("bogus").is_none());
    }
}
