use bevy::input::mouse::MouseMotion;
use bevy::prelude::*;
use bevy::render::camera::PerspectiveProjection;

use crate::loading::AppState;
use crate::spiral::BlockPositions;
use crate::stream::{JumpToHeight, StreamWindow};

#[derive(Component)]
pub struct ExplorerCamera;

#[derive(Component)]
pub struct CameraController {
    pub move_speed: f32,
    pub look_sensitivity: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            move_speed: 300.0,
            look_sensitivity: 0.003,
            pitch: 0.0,
            yaw: 0.0,
        }
    }
}

/// Altitude the observer settles at over a block (the map-style overview).
pub const MAP_VIEW_ALTITUDE: f32 = 500.0;

const BOOST_MULTIPLIER: f32 = 10.0;

pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(OnEnter(AppState::Exploring), setup_camera)
            .add_systems(
                Update,
                (camera_look, camera_move, snap_to_jump_target)
                    .run_if(in_state(AppState::Exploring)),
            );
    }
}

fn setup_camera(
    mut commands: Commands,
    positions: Res<BlockPositions>,
    window: Res<StreamWindow>,
) {
    let start = positions.get(window.closest_height).unwrap_or(Vec2::ZERO);
    info!(
        "Spawning observer over block {} at ({:.0}, {:.0})",
        window.closest_height, start.x, start.y
    );

    commands.spawn((
        Camera3dBundle {
            transform: Transform::from_xyz(start.x, MAP_VIEW_ALTITUDE, start.y)
                .looking_at(Vec3::new(start.x, 0.0, start.y), Vec3::Z),
            projection: PerspectiveProjection {
                near: 0.1,
                far: 100_000.0,
                fov: 70.0_f32.to_radians(),
                ..default()
            }
            .into(),
            ..default()
        },
        ExplorerCamera,
        CameraController::default(),
    ));
}

fn camera_look(
    mut motion_events: EventReader<MouseMotion>,
    mut query: Query<(&mut Transform, &mut CameraController), With<ExplorerCamera>>,
) {
    let Ok((mut transform, mut controller)) = query.get_single_mut() else {
        return;
    };

    let mut delta = Vec2::ZERO;
    for event in motion_events.read() {
        delta += event.delta;
    }

    if delta.length_squared() > 0.0 {
        controller.yaw -= delta.x * controller.look_sensitivity;
        controller.pitch -= delta.y * controller.look_sensitivity;
        controller.pitch = controller.pitch.clamp(-1.5, 1.5);

        transform.rotation =
            Quat::from_rotation_y(controller.yaw) * Quat::from_rotation_x(controller.pitch);
    }
}

fn camera_move(
    time: Res<Time>,
    keyboard: Res<ButtonInput<KeyCode>>,
    mut query: Query<(&mut Transform, &CameraController), With<ExplorerCamera>>,
) {
    let Ok((mut transform, controller)) = query.get_single_mut() else {
        return;
    };

    let forward = transform.forward().as_vec3();
    let right = transform.right().as_vec3();
    let forward_flat = Vec3::new(forward.x, 0.0, forward.z).normalize_or_zero();
    let right_flat = Vec3::new(right.x, 0.0, right.z).normalize_or_zero();

    let mut velocity = Vec3::ZERO;
    if keyboard.pressed(KeyCode::KeyW) {
        velocity += forward_flat;
    }
    if keyboard.pressed(KeyCode::KeyS) {
        velocity -= forward_flat;
    }
    if keyboard.pressed(KeyCode::KeyD) {
        velocity += right_flat;
    }
    if keyboard.pressed(KeyCode::KeyA) {
        velocity -= right_flat;
    }
    if keyboard.pressed(KeyCode::Space) {
        velocity += Vec3::Y;
    }
    if keyboard.pressed(KeyCode::KeyC) {
        velocity -= Vec3::Y;
    }

    if velocity == Vec3::ZERO {
        return;
    }

    let mut speed = controller.move_speed;
    if keyboard.pressed(KeyCode::ShiftLeft) {
        speed *= BOOST_MULTIPLIER;
    }

    transform.translation += velocity.normalize() * speed * time.delta_seconds();
    transform.translation.y = transform.translation.y.max(1.0);
}

/// Teleport-style navigation: a jump re-centers the observer over the target
/// block so the next window pass and the observer agree on where "here" is.
fn snap_to_jump_target(
    mut jumps: EventReader<JumpToHeight>,
    positions: Res<BlockPositions>,
    mut query: Query<&mut Transform, With<ExplorerCamera>>,
) {
    let Some(jump) = jumps.read().last() else {
        return;
    };
    let Ok(mut transform) = query.get_single_mut() else {
        return;
    };
    let Some(target) = positions.get(jump.height.min(positions.max_height())) else {
        return;
    };

    transform.translation = Vec3::new(target.x, MAP_VIEW_ALTITUDE, target.y);
    transform.look_at(Vec3::new(target.x, 0.0, target.y), Vec3::Z);
}
