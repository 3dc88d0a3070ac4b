use clap::Parser;
use client::config::ConnectionArgs;
use client::game::GameScene;
use client::input::InputManager;
use client::network::{ClientEvent, NetworkHandle};
use client::rendering::MacroquadSurface;
use client::ClientConfig;
use env_logger::Env;
use log::{error, info};
use macroquad::prelude::*;
use macroquad::window::Conf;
use shared::{WORLD_HEIGHT, WORLD_WIDTH};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Position Sync".to_owned(),
        window_width: WORLD_WIDTH as i32,
        window_height: WORLD_HEIGHT as i32,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Client error: {}", e);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from(Args::parse().connection);

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);
    info!("Controls: Arrow keys or WASD to move, Enter to change name");

    // The network task runs on its own runtime; macroquad keeps the main thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let mut network = {
        let _guard = runtime.enter();
        NetworkHandle::spawn(&config.server_url, config.backoff)
    };

    let mut scene = GameScene::new(config.render_delay, config.name.clone());
    let mut surface = MacroquadSurface::new();
    let mut input = InputManager::new();
    let epoch = Instant::now();

    loop {
        let now_ms = epoch.elapsed().as_millis() as u64;

        while let Some(event) = network.try_recv() {
            match event {
                ClientEvent::Status(status) => scene.handle_status(status, &mut surface),
                ClientEvent::Message(message) => {
                    scene.handle_message(message, now_ms, &mut surface)
                }
            }
        }

        let frame = input.update();
        if let Some(name) = frame.submitted_name {
            if let Some(message) = scene.set_name(&name) {
                network.send(message);
            }
        }

        scene.update(get_frame_time(), frame.intent, now_ms, &mut surface);
        if let Some(message) = scene.position_update(now_ms) {
            network.send(message);
        }

        surface.render(&scene, input.editing_name());
        next_frame().await;
    }
}
