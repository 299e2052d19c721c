use std::time::Duration;

use replset_client::{
    bson::{doc, Bson},
    ClientBuilder, ReadPreference, ReadPreferenceMode, TagSet, TracingCommandEventHandler,
};
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    // Other members are discovered from the seed.
    let uri = std::env::var("REPLSET_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=repl0".to_string());

    let client = ClientBuilder::from_connection_string(&uri)?
        .set_command_event_handler(std::sync::Arc::new(TracingCommandEventHandler::started_only()))
        .build()?;

    let topology = client.monitor().wait_for_ready(Duration::from_secs(5)).await?;
    for member in &topology.members {
        tracing::info!(
            "{} is {} with tags {:?}",
            member.address,
            member.role,
            member.tags
        );
    }

    // A single empty tag set matches every secondary.
    let read_preference =
        ReadPreference::new(ReadPreferenceMode::SecondaryPreferred, vec![TagSet::new()])?;
    let reply = client
        .run_command(
            "admin",
            doc! { "replSetGetStatus": 1 },
            Some(read_preference),
        )
        .await?;

    let members = reply.get_array("members")?;
    let selected = members
        .iter()
        .filter_map(Bson::as_document)
        .find(|m| m.get_bool("self").unwrap_or(false))
        .ok_or_else(|| anyhow::anyhow!("replSetGetStatus did not report the selected member"))?;

    let state = selected.get_str("stateStr")?;
    if state == "SECONDARY" {
        println!("OK: selected SECONDARY");
    } else {
        println!("ERROR: expected to select SECONDARY, but selected {}", state);
    }

    let summary = Bson::Document(selected.clone()).into_relaxed_extjson();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    client.shutdown().await;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(HierarchicalLayer::new(2));
    set_global_default(subscriber).expect("Failed to set subscriber");
}
