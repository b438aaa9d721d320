//! Pick a choice from a prompt under a static preference ladder.

use crate::transport::Choice;

/// Scan `preference` top to bottom and return the first choice whose label contains
/// that entry (case-insensitive). None when nothing matches.
pub fn resolve_choice<'c, S: AsRef<str>>(choices: &'c [Choice], preference: &[S]) -> Option<&'c Choice> {
    let labels: Vec<String> = choices.iter().map(|c| c.label.to_lowercase()).collect();
    preference.iter().find_map(|wanted| {
        let wanted = wanted.as_ref().trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        labels
            .iter()
            .position(|label| label.contains(&wanted))
            .map(|i| &choices[i])
    })
}
