use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "6794".to_string());
    let userid = std::env::var("MOCK_HMC_USERID").unwrap_or_else(|_| "ensadmin".to_string());
    let password = std::env::var("MOCK_HMC_PASSWORD").unwrap_or_else(|_| "password".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, %userid, "mock console listening");
    mock_hmc::run(listener, &userid, &password).await
}
