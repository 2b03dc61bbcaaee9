//! Plain-text renditions of a transcript for saving and sharing.

use chrono::NaiveDate;
use farm_chat_model::{Role, Turn};

/// Title used when sharing a transcript.
pub const SHARE_TITLE: &str = "Farm Helper AI Chat History";

const ASSISTANT_NAME: &str = "Farm Helper AI";

/// Renders the transcript for a downloaded text file.
pub fn download_text(turns: &[Turn]) -> String {
    render(turns, 40)
}

/// Renders the transcript for sharing through a messenger, e-mail or the
/// clipboard.
pub fn share_text(turns: &[Turn]) -> String {
    render(turns, 20)
}

/// Returns the file name of a download made on `date`.
pub fn download_file_name(date: NaiveDate) -> String {
    format!("farm-helper-chat-{}.txt", date.format("%Y-%m-%d"))
}

fn render(turns: &[Turn], rule: usize) -> String {
    let rule = "-".repeat(rule);
    turns
        .iter()
        .filter(|turn| turn.role != Role::System)
        .map(|turn| {
            let author = match turn.role {
                Role::User => "User",
                _ => ASSISTANT_NAME,
            };
            format!("{author}:\n{}\n{rule}\n", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns() -> Vec<Turn> {
        vec![
            Turn::user("When to sow wheat?"),
            Turn::assistant("• Early November"),
        ]
    }

    #[test]
    fn test_download_text() {
        let dashes = "-".repeat(40);
        assert_eq!(
            download_text(&turns()),
            format!(
                "User:\nWhen to sow wheat?\n{dashes}\n\n\
                 Farm Helper AI:\n• Early November\n{dashes}\n"
            )
        );
    }

    #[test]
    fn test_share_text() {
        let text = share_text(&turns());
        assert!(text.starts_with("User:\nWhen to sow wheat?\n"));
        let separator = format!("\n{}\n\nFarm Helper AI:", "-".repeat(20));
        assert!(text.contains(&separator));
        assert!(!text.contains(&"-".repeat(21)));
    }

    #[test]
    fn test_empty_and_file_name() {
        assert_eq!(download_text(&[]), "");
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        assert_eq!(download_file_name(date), "farm-helper-chat-2024-11-05.txt");
    }
}
