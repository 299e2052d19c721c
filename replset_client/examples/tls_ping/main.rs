use replset_client::{bson::doc, Client, TlsOptions};
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

/// Pings a TLS-enabled server using a client certificate whose key is an encrypted PKCS#8 block.
///
/// `CA_PATH` and `CLIENT_PATH` name the CA file and the certificate-key file. `CLIENT_PASSWORD`
/// is the key's password.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let ca_path = std::env::var("CA_PATH")?;
    let client_path = std::env::var("CLIENT_PATH")?;
    let password = std::env::var("CLIENT_PASSWORD").ok();
    let seed = std::env::var("SEED").unwrap_or_else(|_| "localhost:27017".to_string());

    let client = Client::builder()
        .set_seeds(&[seed])
        .set_tls_options(TlsOptions {
            ca_file: Some(ca_path.into()),
            cert_key_file: Some(client_path.into()),
            cert_key_file_password: password,
        })
        .build()?;

    match client.run_command("test", doc! { "ping": 1 }, None).await {
        Ok(reply) => println!("got: {}", reply),
        Err(e) => {
            tracing::error!("Ping failed: {}", &e);
            return Err(e.into());
        }
    }

    client.shutdown().await;
    Ok(())
}

fn setup_tracing() {
    LogTracer::init().expect("Failed to set logger");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(HierarchicalLayer::new(2));
    set_global_default(subscriber).expect("Failed to set subscriber");
}
