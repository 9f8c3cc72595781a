use std::sync::Arc;

use secrecy::SecretString;

use push_tmux::config::{Config, local_device_name};
use push_tmux::delivery::DeliveryScheduler;
use push_tmux::error::{ConfigError, ListenerError};
use push_tmux::pushbullet::{PushApi, PushListener, PushbulletClient};
use push_tmux::router::Router;
use push_tmux::tmux::ProcessTmux;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let token = SecretString::from(
        std::env::var("PUSHBULLET_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("PUSHBULLET_TOKEN".to_string()))?,
    );
    let client = PushbulletClient::new(token.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("listen");

    match command {
        "listen" => {
            listen_once(&client, &token).await?;
        }
        "daemon" => {
            daemon(&client, &token).await?;
        }
        "register" => {
            let name = args
                .get(1)
                .cloned()
                .unwrap_or_else(local_device_name);
            let device = client.create_device(&name).await?;
            println!("Registered device '{}' ({})", device.nickname, device.iden);
        }
        "list-devices" => {
            for device in client.list_devices().await? {
                let status = if device.active { "active" } else { "inactive" };
                println!("{}\t{}\t{}", device.nickname, device.iden, status);
            }
        }
        "delete-devices" => {
            let names: Vec<&String> = args.iter().skip(1).collect();
            if names.is_empty() {
                anyhow::bail!("Usage: push-tmux delete-devices <name>...");
            }
            let devices = client.list_devices().await?;
            for name in names {
                match devices.iter().find(|d| &d.nickname == name) {
                    Some(device) => {
                        client.delete_device(&device.iden).await?;
                        println!("Deleted device '{name}'");
                    }
                    None => eprintln!("No device named '{name}'"),
                }
            }
        }
        "send-key" => {
            let Some(text) = args.get(1) else {
                anyhow::bail!("Usage: push-tmux send-key <text> [session]");
            };
            let config = Arc::new(Config::load_or_default()?);
            let scheduler = DeliveryScheduler::new(Arc::new(ProcessTmux::new()), config);
            scheduler.deliver(text, args.get(2).map(String::as_str)).await?;
        }
        other => {
            anyhow::bail!(
                "Unknown command '{other}'. Commands: listen, daemon, register, \
                 list-devices, delete-devices, send-key"
            );
        }
    }

    Ok(())
}

fn build_router(client: &PushbulletClient) -> anyhow::Result<Arc<Router>> {
    let config = Arc::new(Config::load_or_default()?);
    let api: Arc<dyn PushApi> = Arc::new(client.clone());
    let tmux = Arc::new(ProcessTmux::new());
    Ok(Arc::new(Router::new(config, api, tmux)))
}

/// Run the listener until it stops; Ctrl-C requests a clean shutdown.
async fn listen_once(client: &PushbulletClient, token: &SecretString) -> anyhow::Result<()> {
    let router = build_router(client)?;
    let api: Arc<dyn PushApi> = Arc::new(client.clone());
    let (mut listener, handle) = PushListener::new(api, router, token);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            handle.stop();
        }
    });

    tracing::info!(device = %local_device_name(), "Listening for pushes");
    listener.run().await?;
    Ok(())
}

/// Like `listen`, but restart the listener whenever it gives up, pausing
/// briefly between restarts.
async fn daemon(client: &PushbulletClient, token: &SecretString) -> anyhow::Result<()> {
    loop {
        let router = build_router(client)?;
        let api: Arc<dyn PushApi> = Arc::new(client.clone());
        let (mut listener, handle) = PushListener::new(api, router, token);

        let run = listener.run();
        tokio::pin!(run);
        tokio::select! {
            res = &mut run => match res {
                Ok(()) => return Ok(()),
                Err(ListenerError::ReconnectsExhausted { attempts }) => {
                    tracing::warn!(attempts, "Listener gave up; restarting");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                handle.stop();
                let _ = run.await;
                return Ok(());
            }
        }
    }
}
