use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PixelShare - share photos and videos from the terminal.
#[derive(Parser, Debug)]
#[command(name = "pixelshare", version, about = "PixelShare - share photos and videos from the terminal.")]
pub struct Cli {
    /// Path to config file (default: ~/.config/pixelshare/config.yaml).
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and remember the session.
    Login {
        /// Account email.
        email: String,
        /// Password (prompted when omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Create a new account.
    Register {
        /// Account email.
        email: String,
        /// Password (prompted when omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the stored session.
    Logout,

    /// Show the signed-in account.
    Whoami,

    /// Show the feed, newest first.
    Feed {
        /// Only posts you uploaded.
        #[arg(long)]
        mine: bool,
        /// Print posts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Share an image or video.
    Upload {
        /// File to upload.
        file: PathBuf,
        /// Caption shown under the post.
        #[arg(long, short = 'c', default_value = "")]
        caption: String,
    },

    /// Delete one of your posts.
    Delete {
        /// Post id.
        id: String,
        /// Skip confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_upload_with_caption() {
        let cli = Cli::try_parse_from(["pixelshare", "upload", "cat.jpg", "-c", "hello"]).unwrap();
        match cli.command {
            Command::Upload { file, caption } => {
                assert_eq!(file, PathBuf::from("cat.jpg"));
                assert_eq!(caption, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn caption_defaults_to_empty() {
        let cli = Cli::try_parse_from(["pixelshare", "upload", "cat.jpg"]).unwrap();
        assert!(matches!(cli.command, Command::Upload { ref caption, .. } if caption.is_empty()));
    }
}
