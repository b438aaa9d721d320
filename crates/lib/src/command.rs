//! Dot-commands a user types to request a fetch (`.tiktok <link>`) or help (`.start`).

use crate::config::Config;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Fetch { platform: Platform, link: String },
}

/// Parse one command line. None for anything that is not a recognized command.
pub fn parse_command(line: &str) -> Option<Command> {
    let rest = line.trim().strip_prefix('.')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name.to_lowercase().as_str() {
        "start" | "help" if arg.is_empty() => Some(Command::Help),
        _ if arg.is_empty() => None,
        other => other.parse::<Platform>().ok().map(|platform| Command::Fetch {
            platform,
            link: arg.to_string(),
        }),
    }
}

/// Command list for every configured platform.
pub fn help_text(config: &Config) -> String {
    let mut out = String::from("Commands:\n");
    for (platform, pc) in &config.platforms {
        out.push_str(&format!(
            "  .{} <link>  fetch {} content ({} bot{})\n",
            platform,
            platform.display_name(),
            pc.agents.len(),
            if pc.agents.len() == 1 { "" } else { "s" }
        ));
    }
    out.push_str("  .start       show this list\n");
    out
}
