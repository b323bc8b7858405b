use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Git smart-transport verbs accepted over SSH. Anything else is rejected
/// before a process is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitVerb {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl GitVerb {
    pub const ALL: [GitVerb; 3] = [
        GitVerb::UploadPack,
        GitVerb::ReceivePack,
        GitVerb::UploadArchive,
    ];

    /// Allow-list lookup for the command name sent by the client.
    pub fn from_command(command: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.command_name() == command)
    }

    /// Name as it appears in the SSH exec request (`git-upload-pack`).
    pub fn command_name(&self) -> &'static str {
        match self {
            GitVerb::UploadPack => "git-upload-pack",
            GitVerb::ReceivePack => "git-receive-pack",
            GitVerb::UploadArchive => "git-upload-archive",
        }
    }

    /// Server-side `git` subcommand (`upload-pack`).
    pub fn subcommand(&self) -> &'static str {
        match self {
            GitVerb::UploadPack => "upload-pack",
            GitVerb::ReceivePack => "receive-pack",
            GitVerb::UploadArchive => "upload-archive",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, GitVerb::ReceivePack)
    }
}

impl fmt::Display for GitVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("command not allowed: {0}")]
    VerbNotAllowed(String),

    #[error("repository path escapes storage root: {0}")]
    PathOutsideRoot(PathBuf),

    #[error("failed to start git {subcommand}: {source}")]
    Spawn {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {subcommand} exited with status {code}")]
    Exited { subcommand: String, code: i32 },

    #[error("git {subcommand} was interrupted")]
    Interrupted { subcommand: String },

    #[error("stream error while running git {subcommand}: {source}")]
    Stream {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args} failed: {stderr}")]
    Admin { args: String, stderr: String },
}

impl GitError {
    /// Exit status reported to the SSH client for this failure.
    pub fn exit_status(&self) -> u32 {
        match self {
            GitError::Exited { code, .. } if *code > 0 => *code as u32,
            GitError::Interrupted { .. } => 130,
            _ => 1,
        }
    }
}
