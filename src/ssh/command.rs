use crate::git::GitVerb;
use crate::storage::types::{KeyError, RepositoryKey};

use thiserror::Error;

/// A validated exec request: an allow-listed verb and an `owner/name` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub verb: GitVerb,
    /// The client's path with quotes removed. Leading `/` and trailing
    /// `.git` are kept; the access adapter normalizes them.
    pub path: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("command not allowed: {0}")]
    NotAllowed(String),
    #[error("missing repository path")]
    MissingPath,
    #[error("unbalanced quotes in repository path")]
    UnbalancedQuote,
    #[error("unexpected arguments after repository path")]
    TrailingArguments,
    #[error("invalid repository path: {0}")]
    InvalidPath(#[from] KeyError),
}

/// Parses `<verb> '<path>'`, `<verb> "<path>"` or `<verb> <path>`.
pub fn parse_git_command(raw: &str) -> Result<GitCommand, CommandError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CommandError::Empty);
    }

    let (verb, rest) = match raw.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (raw, ""),
    };
    let verb = GitVerb::from_command(verb).ok_or_else(|| CommandError::NotAllowed(verb.to_string()))?;

    if rest.is_empty() {
        return Err(CommandError::MissingPath);
    }

    let path = unquote(rest)?;
    RepositoryKey::parse(path)?;

    Ok(GitCommand {
        verb,
        path: path.to_string(),
    })
}

fn unquote(arg: &str) -> Result<&str, CommandError> {
    for quote in ['\'', '"'] {
        if let Some(body) = arg.strip_prefix(quote) {
            let inner = body.strip_suffix(quote).ok_or(CommandError::UnbalancedQuote)?;
            if inner.contains(quote) {
                return Err(CommandError::TrailingArguments);
            }
            return Ok(inner);
        }
    }

    if arg.contains(['\'', '"']) {
        return Err(CommandError::UnbalancedQuote);
    }
    if arg.contains(char::is_whitespace) {
        return Err(CommandError::TrailingArguments);
    }
    Ok(arg)
}
