use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use hubsas_credentials::{
    ConnectionString, CredentialProvider, CredentialState, RenewalConfig, RenewalWatcher,
    SigningStrategy, TrustedCertificate,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The device connection string, holding either a shared access key or a signature
    #[arg(short, long, env = "HUB_CONNECTION_STRING", hide_env_values = true)]
    connection_string: String,

    /// The lifetime of minted tokens, in seconds
    #[arg(short = 'l', long, env, default_value_t = 3600)]
    token_valid_secs: u64,

    /// The percentage of a token's lifetime after which it is renewed
    #[arg(short = 'b', long, env, default_value_t = 85)]
    time_buffer_percent: u8,

    /// A PEM file of additional certificates to trust
    #[arg(long, env)]
    trusted_ca: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let (identity, credential) = opts
        .connection_string
        .parse::<ConnectionString>()?
        .into_parts();

    let renewal = RenewalConfig::new(opts.token_valid_secs, opts.time_buffer_percent)?;

    let mut builder = CredentialProvider::builder(identity).with_renewal_config(renewal);
    if let Some(path) = opts.trusted_ca {
        builder = builder.with_trusted_certificate(TrustedCertificate::Path(path));
    }

    let provider = Arc::new(builder.build(SigningStrategy::try_from(credential)?)?);

    let tls = provider.get_ssl_context()?;
    tracing::info!(
        protocols = ?tls.alpn_protocols,
        "TLS context ready"
    );

    let watcher = RenewalWatcher::spawn(Arc::clone(&provider)).await?;

    tracing::info!(
        token = format_args!("{:?}", watcher.token()),
        "first token"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let token = watcher.token();
        let state = provider.state();
        match state {
            CredentialState::Fresh => {
                tracing::debug!(?state, expiry = token.expiry().0, "pulled token")
            }
            CredentialState::Stale => {
                tracing::warn!(?state, expiry = token.expiry().0, "pulled token")
            }
            CredentialState::Unrecoverable => {
                tracing::error!(
                    ?state,
                    expiry = token.expiry().0,
                    "token expired and cannot be renewed, supply a new connection string"
                );
                return Ok(());
            }
        }
    }
}
