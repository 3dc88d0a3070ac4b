//! Keyboard sampling for movement and name entry

use crate::game::MoveIntent;
use macroquad::prelude::*;

/// Name edits are capped so labels stay readable
const MAX_NAME_LEN: usize = 24;

/// What the player asked for this frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameInput {
    pub intent: MoveIntent,
    pub submitted_name: Option<String>,
}

/// Samples the keyboard once per frame
///
/// Arrow keys and WASD move the player. Enter opens the name prompt, and
/// while it is open typed characters go to the prompt instead of movement;
/// Enter again submits it and Escape cancels.
pub struct InputManager {
    editing: Option<String>,
}

impl InputManager {
    pub fn new() -> Self {
        Self { editing: None }
    }

    /// Text of the open name prompt, if any
    pub fn editing_name(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn update(&mut self) -> FrameInput {
        match self.editing.take() {
            Some(buffer) => self.update_prompt(buffer),
            None => {
                if is_key_pressed(KeyCode::Enter) {
                    // Swallow the characters queued before the prompt opened
                    while get_char_pressed().is_some() {}
                    self.editing = Some(String::new());
                    return FrameInput::default();
                }
                FrameInput {
                    intent: Self::sample_movement(),
                    submitted_name: None,
                }
            }
        }
    }

    fn update_prompt(&mut self, mut buffer: String) -> FrameInput {
        if is_key_pressed(KeyCode::Escape) {
            return FrameInput::default();
        }
        if is_key_pressed(KeyCode::Enter) {
            return FrameInput {
                intent: MoveIntent::default(),
                submitted_name: Some(buffer),
            };
        }
        if is_key_pressed(KeyCode::Backspace) {
            buffer.pop();
        }

        while let Some(c) = get_char_pressed() {
            if !c.is_control() && buffer.chars().count() < MAX_NAME_LEN {
                buffer.push(c);
            }
        }

        self.editing = Some(buffer);
        FrameInput::default()
    }

    fn sample_movement() -> MoveIntent {
        let left = is_key_down(KeyCode::Left) || is_key_down(KeyCode::A);
        let right = is_key_down(KeyCode::Right) || is_key_down(KeyCode::D);
        let up = is_key_down(KeyCode::Up) || is_key_down(KeyCode::W);
        let down = is_key_down(KeyCode::Down) || is_key_down(KeyCode::S);

        // Left wins over right and up over down, one axis at a time
        let dx = if left {
            -1.0
        } else if right {
            1.0
        } else {
            0.0
        };
        let dy = if up {
            -1.0
        } else if down {
            1.0
        } else {
            0.0
        };

        MoveIntent::new(dx, dy)
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
