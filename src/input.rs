use bevy::prelude::*;
use bevy::window::{CursorGrabMode, PrimaryWindow};
use rand::Rng;

use crate::loading::AppState;
use crate::spiral::BlockPositions;
use crate::stream::JumpToHeight;

pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (cursor_grab_system, exit_system))
            .add_systems(Update, jump_keys.run_if(in_state(AppState::Exploring)));
    }
}

fn cursor_grab_system(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut window_query: Query<&mut Window, With<PrimaryWindow>>,
) {
    let Ok(mut window) = window_query.get_single_mut() else {
        return;
    };

    if keyboard.just_pressed(KeyCode::Escape) {
        match window.cursor.grab_mode {
            CursorGrabMode::None => {
                window.cursor.grab_mode = CursorGrabMode::Locked;
                window.cursor.visible = false;
            }
            _ => {
                window.cursor.grab_mode = CursorGrabMode::None;
                window.cursor.visible = true;
            }
        }
    }
}

fn exit_system(keyboard: Res<ButtonInput<KeyCode>>, mut exit: EventWriter<AppExit>) {
    if keyboard.pressed(KeyCode::ControlLeft) && keyboard.just_pressed(KeyCode::KeyQ) {
        exit.send(AppExit::Success);
    }
}

/// R jumps to a random block, Home returns to the chain tip.
fn jump_keys(
    keyboard: Res<ButtonInput<KeyCode>>,
    positions: Res<BlockPositions>,
    mut jumps: EventWriter<JumpToHeight>,
) {
    if keyboard.just_pressed(KeyCode::KeyR) {
        let height = rand::thread_rng().gen_range(0..=positions.max_height());
        info!("Jumping to random block at height {}", height);
        jumps.send(JumpToHeight { height });
    }

    if keyboard.just_pressed(KeyCode::Home) {
        info!("Jumping to chain tip at height {}", positions.max_height());
        jumps.send(JumpToHeight {
            height: positions.max_height(),
        });
    }
}
