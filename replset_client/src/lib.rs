/*!
replset_client is a small client library for MongoDB replica sets.

It keeps a continuously refreshed view of the replica-set members in the background and
uses that view to pick a member for each command according to a [`ReadPreference`],
honoring tag sets and a latency window.

The library requires tokio. The [`TopologyMonitor`] runs as an actor task and publishes
immutable [`TopologySnapshot`]s; any number of callers can read the latest snapshot and
run selection against it without blocking each other or the refresh loop.

# Example
```rust,no_run
# tokio_test::block_on(async {
use replset_client::{bson::doc, Client, ReadPreference, ReadPreferenceMode, TagSet};

let client = Client::builder()
    .set_seeds(&["localhost:27017"])
    .set_replica_set_name("repl0")
    .build()
    .unwrap();

let read_preference =
    ReadPreference::new(ReadPreferenceMode::SecondaryPreferred, vec![TagSet::new()]).unwrap();

let reply = client
    .run_command("admin", doc! { "replSetGetStatus": 1 }, Some(read_preference))
    .await
    .unwrap();
println!("{}", reply);
# })
```
*/

mod client;
mod command;
mod connection_string;
mod event;
mod hello_reply;
mod member;
mod monitor;
mod read_preference;
mod server_address;
mod server_selector;
mod topology;
mod transport;
mod wire;

pub use bson;

pub use client::*;
pub use command::*;
pub use connection_string::*;
pub use event::*;
pub use member::*;
pub use monitor::*;
pub use read_preference::*;
pub use server_address::*;
pub use server_selector::*;
pub use topology::*;
pub use transport::*;

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
