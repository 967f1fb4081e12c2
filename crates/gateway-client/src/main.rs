use anyhow::Context;
use realmwire_client::{logging, Client, ClientConfig};
use realmwire_core::WireBuffer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let realm_name = std::env::var("REALMWIRE_REALM")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let config = ClientConfig::from_env()?;
    let client = Client::new(config);
    let account = client.login().await.context("logon")?;

    let realm = match &realm_name {
        Some(name) => account
            .realms
            .find(name)
            .with_context(|| format!("realm {name:?} not in realm list"))?,
        None => account
            .realms
            .realms
            .first()
            .context("realm list is empty")?,
    };

    let sink = |opcode: u16, payload: WireBuffer| {
        info!(opcode, size = payload.len(), "world.packet");
    };
    let world = client
        .connect_world(&account, realm, sink)
        .await
        .context("world connect")?;

    let sender = world.sender();
    let session = world.join();
    tokio::pin!(session);
    tokio::select! {
        result = &mut session => result.context("world session")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("install ctrl-c handler")?;
            info!("shutting down");
            sender.drain_and_close()?;
            session.await.context("world session")?;
        }
    }
    Ok(())
}
