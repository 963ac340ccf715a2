//! Compose-line handling for the input loop.

use std::ops::ControlFlow;

use tracing::warn;

use parlor_chat::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Quit,
    Refresh,
    Text(&'a str),
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "/quit" => Self::Quit,
            "/refresh" => Self::Refresh,
            text => Self::Text(text),
        }
    }
}

/// Forward one typed line to the session.
///
/// `Break` ends the input loop: on `/quit`, or once the session task has
/// stopped and no longer takes commands.
pub async fn forward(handle: &SessionHandle, line: &str) -> ControlFlow<()> {
    let result = match Input::parse(line) {
        Input::Quit => return ControlFlow::Break(()),
        Input::Refresh => handle.refresh().await,
        Input::Text(text) => handle.submit(text).await,
    };
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(e) => {
            warn!(error = %e, "Session stopped, leaving input loop");
            ControlFlow::Break(())
        }
    }
}
