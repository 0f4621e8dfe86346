use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    datapac_cli::run().await
}
