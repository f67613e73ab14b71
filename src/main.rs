#[tokio::main]
async fn main() {
    if let Err(err) = messaging_server::app::run().await {
        tracing::error!(error = %err, "messaging server stopped");
        std::process::exit(1);
    }
}
