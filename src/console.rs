//! Operator console
//!
//! Dangerous actions (removing an unreachable member, overwriting data by
//! clone) ask the operator first. Without an interactive console the engine
//! takes the conservative answer, which is always "no" / abort.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

pub trait Console: Send + Sync {
    fn is_interactive(&self) -> bool;

    /// Ask a yes/no question. Non-interactive consoles answer `false`.
    fn confirm(&self, question: &str) -> bool;

    /// Ask to pick one of `choices`. `None` means abort.
    fn prompt_choice(&self, question: &str, choices: &[&str]) -> Option<usize>;
}

/// Console used when nobody is there to answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractiveConsole;

impl Console for NonInteractiveConsole {
    fn is_interactive(&self) -> bool {
        false
    }

    fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn prompt_choice(&self, _question: &str, _choices: &[&str]) -> Option<usize> {
        None
    }
}

/// Interactive console with pre-recorded answers, consumed in order.
///
/// Answers are `y`/`n` for confirmations and a choice label for prompts.
/// An exhausted script answers like [`NonInteractiveConsole`].
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_answer(&self, question: &str) -> Option<String> {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(question.to_string());
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn pick(answer: &str, choices: &[&str]) -> Option<usize> {
    let answer = answer.trim();
    if let Ok(n) = answer.parse::<usize>() {
        return (1..=choices.len()).contains(&n).then(|| n - 1);
    }
    choices.iter().position(|c| c.eq_ignore_ascii_case(answer))
}

impl Console for ScriptedConsole {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, question: &str) -> bool {
        self.next_answer(question).is_some_and(|a| is_yes(&a))
    }

    fn prompt_choice(&self, question: &str, choices: &[&str]) -> Option<usize> {
        self.next_answer(question).and_then(|a| pick(&a, choices))
    }
}

/// Console reading answers from stdin and asking on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConsole;

impl StdinConsole {
    fn ask(&self, prompt: &str) -> Option<String> {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{} ", prompt);
        let _ = stderr.flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

impl Console for StdinConsole {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, question: &str) -> bool {
        self.ask(&format!("{} [y/N]:", question))
            .is_some_and(|a| is_yes(&a))
    }

    fn prompt_choice(&self, question: &str, choices: &[&str]) -> Option<usize> {
        let listed: Vec<String> = choices
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}) {}", i + 1, c))
            .collect();
        self.ask(&format!("{}\n{}\nPlease select an option:", question, listed.join("\n")))
            .and_then(|a| pick(&a, choices))
    }
}
