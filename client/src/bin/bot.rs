//! Headless client that wanders around the world, for load and soak testing

use clap::Parser;
use client::config::ConnectionArgs;
use client::game::{GameScene, MoveIntent, RenderSurface};
use client::network::{ClientEvent, NetworkHandle};
use client::reconnect::ConnectionStatus;
use client::ClientConfig;
use env_logger::Env;
use log::{debug, info, warn};
use rand::Rng;
use shared::Position;
use std::time::{Duration, Instant};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Milliseconds between direction changes
    #[arg(long, default_value_t = 1000)]
    wander_ms: u64,
}

/// Logs what a window would have drawn
#[derive(Default)]
struct LogSurface {
    remotes: usize,
}

impl RenderSurface for LogSurface {
    fn spawn_remote(&mut self, id: &str, name: &str, position: Position) {
        self.remotes += 1;
        info!("{} ({}) appeared at ({:.0}, {:.0})", name, id, position.x, position.y);
    }

    fn update_remote(&mut self, id: &str, position: Position, name: Option<&str>) {
        if let Some(name) = name {
            info!("{} is now called {}", id, name);
        }
        debug!("{} at ({:.1}, {:.1})", id, position.x, position.y);
    }

    fn despawn_remote(&mut self, id: &str) {
        self.remotes = self.remotes.saturating_sub(1);
        info!("{} left", id);
    }

    fn set_status(&mut self, status: &ConnectionStatus) {
        match status {
            ConnectionStatus::GaveUp { .. } => warn!("{}", status.label()),
            _ => info!("{}", status.label()),
        }
    }
}

fn random_intent(rng: &mut impl Rng) -> MoveIntent {
    let dx = rng.gen_range(-1i8..=1);
    let dy = rng.gen_range(-1i8..=1);
    MoveIntent::new(f32::from(dx), f32::from(dy))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let wander = Duration::from_millis(args.wander_ms.max(1));
    let config = ClientConfig::from(args.connection);
    info!("Bot connecting to {}", config.server_url);

    let mut network = NetworkHandle::spawn(&config.server_url, config.backoff);
    let mut scene = GameScene::new(config.render_delay, config.name.clone());
    let mut surface = LogSurface::default();
    let mut rng = rand::thread_rng();

    let epoch = Instant::now();
    let mut frame = interval(Duration::from_millis(16));
    let mut last_frame = Instant::now();
    let mut last_turn = Instant::now();
    let mut intent = random_intent(&mut rng);

    loop {
        frame.tick().await;
        let now_ms = epoch.elapsed().as_millis() as u64;
        let dt = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();

        while let Some(event) = network.try_recv() {
            match event {
                ClientEvent::Status(status) => scene.handle_status(status, &mut surface),
                ClientEvent::Message(message) => {
                    scene.handle_message(message, now_ms, &mut surface)
                }
            }
        }

        if matches!(scene.status(), ConnectionStatus::GaveUp { .. }) {
            break;
        }

        if last_turn.elapsed() >= wander {
            intent = random_intent(&mut rng);
            last_turn = Instant::now();
        }

        scene.update(dt, intent, now_ms, &mut surface);
        if let Some(message) = scene.position_update(now_ms) {
            network.send(message);
        }
    }

    info!("Bot stopped with {} remote players in view", surface.remotes);
    Ok(())
}
