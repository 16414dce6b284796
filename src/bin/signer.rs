use anyhow::Context;
use clap::Parser;
use roomchat::config::Config;
use roomchat::media::UploadSigner;
use tracing::info;

#[derive(Parser)]
#[command(name = "roomchat-signer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mints Cloudinary upload signatures for roomchat clients")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let cloudinary = config.require_cloudinary()?;
    let secret = cloudinary
        .api_secret
        .clone()
        .context("CLOUDINARY_API_SECRET must be set to sign uploads")?;

    let app = roomchat::server::router(UploadSigner::new(secret, cloudinary.upload_preset.clone()));

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("signing server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
