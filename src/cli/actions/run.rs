use crate::cli::actions::{sessions, widget, Action};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::WidgetVerify(args) => widget::execute(args).await,
        Action::Sessions(args) => sessions::execute(args).await,
    }
}
