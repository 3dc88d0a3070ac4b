use crate::game::{GameScene, RenderSurface};
use crate::reconnect::ConnectionStatus;
use macroquad::prelude::*;
use shared::{Position, WORLD_HEIGHT, WORLD_WIDTH};
use std::collections::HashMap;

const PLAYER_SIZE: f32 = 24.0;
const LABEL_OFFSET: f32 = 20.0;
const PANEL_WIDTH: f32 = 220.0;

struct RemoteSprite {
    name: String,
    position: Position,
}

/// Draws the scene with macroquad and keeps one sprite per remote player
pub struct MacroquadSurface {
    remotes: HashMap<String, RemoteSprite>,
    status: ConnectionStatus,
}

impl MacroquadSurface {
    pub fn new() -> Self {
        Self {
            remotes: HashMap::new(),
            status: ConnectionStatus::Connecting { attempt: 1 },
        }
    }

    pub fn render(&self, scene: &GameScene, editing_name: Option<&str>) {
        clear_background(Color::from_rgba(26, 26, 26, 255));
        self.draw_world_bounds();

        for sprite in self.remotes.values() {
            Self::draw_player(
                sprite.position,
                &sprite.name,
                Color::from_rgba(255, 68, 68, 255),
            );
        }

        if let Some(local) = scene.local_player() {
            Self::draw_player(local.position, &local.name, GREEN);
        }

        self.draw_ui(scene, editing_name);
    }

    fn draw_world_bounds(&self) {
        draw_rectangle_lines(
            0.0,
            0.0,
            WORLD_WIDTH,
            WORLD_HEIGHT,
            2.0,
            Color::from_rgba(68, 68, 68, 255),
        );
    }

    fn draw_player(position: Position, name: &str, color: Color) {
        let x = position.x - PLAYER_SIZE / 2.0;
        let y = position.y - PLAYER_SIZE / 2.0;
        draw_rectangle(x, y, PLAYER_SIZE, PLAYER_SIZE, color);
        draw_rectangle_lines(x, y, PLAYER_SIZE, PLAYER_SIZE, 2.0, WHITE);

        let font_size = 16.0;
        let size = measure_text(name, None, font_size as u16, 1.0);
        let label_x = position.x - size.width / 2.0;
        let label_y = position.y - LABEL_OFFSET;
        draw_rectangle(
            label_x - 3.0,
            label_y - size.height - 3.0,
            size.width + 6.0,
            size.height + 6.0,
            BLACK,
        );
        draw_text(name, label_x, label_y, font_size, WHITE);
    }

    fn draw_ui(&self, scene: &GameScene, editing_name: Option<&str>) {
        let x = 10.0;
        let mut y = 10.0;
        draw_rectangle(x, y, PANEL_WIDTH, 96.0, Color::from_rgba(0, 0, 0, 180));

        y += 18.0;
        draw_text("Arrow Keys to move", x + 8.0, y, 16.0, WHITE);

        y += 20.0;
        let status_color = match self.status {
            ConnectionStatus::Connected => GREEN,
            ConnectionStatus::Connecting { .. } => YELLOW,
            _ => RED,
        };
        draw_text(&self.status.label(), x + 8.0, y, 14.0, status_color);

        y += 20.0;
        let players = self.remotes.len() + usize::from(scene.local_player().is_some());
        draw_text(&format!("Players: {}", players), x + 8.0, y, 16.0, WHITE);

        y += 20.0;
        let prompt = match editing_name {
            Some(text) => format!("Name: {}_", text),
            None => "Enter to change name".to_string(),
        };
        draw_text(&prompt, x + 8.0, y, 14.0, LIGHTGRAY);
    }
}

impl Default for MacroquadSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for MacroquadSurface {
    fn spawn_remote(&mut self, id: &str, name: &str, position: Position) {
        self.remotes.insert(
            id.to_string(),
            RemoteSprite {
                name: name.to_string(),
                position,
            },
        );
    }

    fn update_remote(&mut self, id: &str, position: Position, name: Option<&str>) {
        if let Some(sprite) = self.remotes.get_mut(id) {
            sprite.position = position;
            if let Some(name) = name {
                sprite.name = name.to_string();
            }
        }
    }

    fn despawn_remote(&mut self, id: &str) {
        self.remotes.remove(id);
    }

    fn set_status(&mut self, status: &ConnectionStatus) {
        self.status = status.clone();
    }
}
