pub mod sessions;
pub mod widget;

mod run;

#[derive(Debug)]
pub enum Action {
    WidgetVerify(widget::Args),
    Sessions(sessions::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
