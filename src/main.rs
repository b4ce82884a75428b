mod art_resolver;
mod artwork_manager;
mod bridge_manager;
mod config;
mod errors;
mod player_source;
mod presence_client;
mod protocol;

use std::thread;

use log::info;
use tokio::sync::broadcast;

use artwork_manager::ArtworkManager;
use bridge_manager::BridgeManager;
use config::{BridgeConfig, Config, PresenceConfig};
use presence_client::IpcPresenceLink;
use protocol::{BridgeMessage, Message};

fn sanitize_config(config: Config) -> Config {
    let clamped_poll_interval = config.bridge.poll_interval_secs.clamp(5, 15);
    let clamped_backoff = config.bridge.player_search_backoff_secs.clamp(1, 30);
    let client_id = if config.presence.client_id.trim().is_empty() {
        PresenceConfig::default().client_id
    } else {
        config.presence.client_id
    };

    Config {
        presence: PresenceConfig {
            client_id,
            show_buttons: config.presence.show_buttons,
        },
        bridge: BridgeConfig {
            poll_interval_secs: clamped_poll_interval,
            player_search_backoff_secs: clamped_backoff,
            auto_connect: config.bridge.auto_connect,
        },
        ui: config.ui,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_dir = dirs::config_dir().unwrap();
    let config_file = config_dir.join("tunelink.toml");

    if !config_file.exists() {
        let default_config = Config::default();

        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        std::fs::write(
            config_file.clone(),
            toml::to_string(&default_config).unwrap(),
        )
        .unwrap();
    }

    let config_content = std::fs::read_to_string(config_file.clone()).unwrap();
    let config = sanitize_config(toml::from_str::<Config>(&config_content).unwrap_or_default());
    // Re-persist the sanitized form so keys added since the file was written
    // show up in the document.
    std::fs::write(config_file, toml::to_string(&config).unwrap()).unwrap();

    // Bus for communication between components
    let (bus_sender, mut status_receiver) = broadcast::channel(1024);

    let artwork_manager_bus_receiver = bus_sender.subscribe();
    let artwork_manager_bus_sender = bus_sender.clone();
    thread::spawn(move || {
        let mut artwork_manager =
            ArtworkManager::new(artwork_manager_bus_receiver, artwork_manager_bus_sender);
        artwork_manager.run();
    });

    let bridge_manager_bus_receiver = bus_sender.subscribe();
    let bridge_manager_bus_sender = bus_sender.clone();
    let bridge_config = config.clone();
    thread::spawn(move || {
        let mut bridge_manager = BridgeManager::new(
            bridge_manager_bus_receiver,
            bridge_manager_bus_sender,
            &bridge_config,
            player_source::platform_player_source(),
            Box::new(IpcPresenceLink::new(
                bridge_config.presence.client_id.clone(),
            )),
        );
        bridge_manager.run();
    });

    if config.bridge.auto_connect {
        info!("Auto-connect enabled. Starting bridge");
        let _ = bus_sender.send(Message::Bridge(BridgeMessage::Start));
    }

    // Status surface for the process: a tray/GUI shell would subscribe to the
    // same notifications instead of this log loop.
    loop {
        match status_receiver.blocking_recv() {
            Ok(Message::Bridge(BridgeMessage::StateChanged { state, detail })) => match detail {
                Some(detail) => info!("Bridge state: {:?} ({})", state, detail),
                None => info!("Bridge state: {:?}", state),
            },
            Ok(Message::Bridge(BridgeMessage::TrackChanged { artist, title, .. })) => {
                info!("Now playing: {} - {}", artist, title);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Status listener lagged by {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}
