//! Command parsing for inbound text.
//!
//! Menu buttons arrive as their label text (with a trailing emoji), so
//! matching is on lowercased words rather than exact strings.

/// A parsed user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`: reset and show the main menu.
    Start,
    /// `/help`.
    HelpCommand,
    /// A message whose first word is `help` (the menu button).
    Help,
    /// A message whose first word is `info`.
    Info,
    /// A message whose first word is `rating`.
    Rating,
    /// The "Single item prediction 🚗" button.
    SinglePrediction,
    /// The "Batch prediction 🛻🚚" button.
    BatchPrediction,
    /// Anything else; handed to the collection engine or the fallback.
    Text(String),
}

/// Parses user input into Command types.
pub struct CommandParser;

impl CommandParser {
    /// Parse message content into a Command.
    pub fn parse(content: &str) -> Command {
        let lower = content.to_lowercase();
        let first_word = lower.split_whitespace().next().unwrap_or("");

        if is_slash_command(first_word, "start") {
            return Command::Start;
        }
        if is_slash_command(first_word, "help") {
            return Command::HelpCommand;
        }

        match first_word {
            "info" => return Command::Info,
            "help" => return Command::Help,
            "rating" => return Command::Rating,
            _ => {}
        }

        // Button labels end in a space and an emoji.
        if drop_last_chars(&lower, 2) == "single item prediction" {
            return Command::SinglePrediction;
        }
        if drop_last_chars(&lower, 3) == "batch prediction" {
            return Command::BatchPrediction;
        }

        Command::Text(content.to_string())
    }
}

/// `/name` or `/name@botname`.
fn is_slash_command(word: &str, name: &str) -> bool {
    let Some(rest) = word.strip_prefix('/') else {
        return false;
    };
    let command = rest.split('@').next().unwrap_or("");
    command == name
}

/// `s` without its last `n` characters.
fn drop_last_chars(s: &str, n: usize) -> &str {
    let keep = s.chars().count().saturating_sub(n);
    match s.char_indices().nth(keep) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
