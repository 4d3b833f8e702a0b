use crate::cli::actions::{check, server, Action};
use anyhow::Result;

pub(super) async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::handle(args).await,
        Action::Check(args) => check::handle(&args),
    }
}
