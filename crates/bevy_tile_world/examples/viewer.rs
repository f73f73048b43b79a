//! Tile Viewer - pans over an infinite streamed tile world.
//!
//! Controls:
//! - WASD/Arrow keys: Move camera
//! - Shift: Speed boost (5x)
//! - Scroll wheel: Zoom
//! - Tab: Next tile server
//! - R: Re-render all tiles
//! - G: Toggle the `show_grid` setting, if the server has one
//! - LMB: Log what is under the cursor
//!
//! Run with: `cargo run -p bevy_tile_world --example viewer -- --sync`

use std::path::PathBuf;

use bevy::input::mouse::{MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use bevy_tile_world::{
  PresentationQueue, SettingValue, TestPatternServer, TileCamera, TileServerRegistry, TileWorld,
  TileWorldConfig, TileWorldPlugin,
};
use clap::Parser;

const CAMERA_SPEED: f32 = 500.0;
const SPEED_BOOST: f32 = 5.0;

#[derive(Parser)]
#[command(name = "viewer")]
struct Args {
  /// TOML configuration file
  #[arg(long)]
  config: Option<PathBuf>,
  /// World seed, overrides the configuration file
  #[arg(long)]
  seed: Option<u64>,
  /// Generate tiles on the main thread
  #[arg(long)]
  sync: bool,
}

fn main() {
  let args = Args::parse();
  let mut config = match &args.config {
    Some(path) => match TileWorldConfig::load(path) {
      Ok(config) => config,
      Err(err) => {
        eprintln!("{}: {err}", path.display());
        std::process::exit(1);
      }
    },
    None => TileWorldConfig::default(),
  };
  if let Some(seed) = args.seed {
    config.world_seed = seed;
  }
  config.generate_synchronously |= args.sync;

  let server = std::sync::Arc::new(TestPatternServer::new(config.world_seed));

  App::new()
    .add_plugins(DefaultPlugins.set(WindowPlugin {
      primary_window: Some(Window {
        title: "Tile Viewer".to_string(),
        resolution: (1280, 720).into(),
        ..default()
      }),
      ..default()
    }))
    .add_plugins(TileWorldPlugin::new(server).with_config(config))
    .add_systems(Startup, setup)
    .add_systems(
      Update,
      (camera_input, zoom_input, server_input, inspect_input),
    )
    .run();
}

fn setup(mut commands: Commands) {
  commands.spawn((Camera2d, TileCamera));
}

fn camera_input(
  keys: Res<ButtonInput<KeyCode>>,
  time: Res<Time>,
  mut camera: Query<&mut Transform, With<TileCamera>>,
) {
  let Ok(mut transform) = camera.single_mut() else {
    return;
  };
  let mut direction = Vec2::ZERO;
  if keys.any_pressed([KeyCode::KeyW, KeyCode::ArrowUp]) {
    direction.y += 1.0;
  }
  if keys.any_pressed([KeyCode::KeyS, KeyCode::ArrowDown]) {
    direction.y -= 1.0;
  }
  if keys.any_pressed([KeyCode::KeyA, KeyCode::ArrowLeft]) {
    direction.x -= 1.0;
  }
  if keys.any_pressed([KeyCode::KeyD, KeyCode::ArrowRight]) {
    direction.x += 1.0;
  }
  let boost = if keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]) {
    SPEED_BOOST
  } else {
    1.0
  };
  let step = direction.normalize_or_zero() * CAMERA_SPEED * boost * time.delta_secs();
  transform.translation += step.extend(0.0);
}

fn zoom_input(
  mut wheel: MessageReader<MouseWheel>,
  mut camera: Query<&mut Projection, With<TileCamera>>,
) {
  let Ok(mut projection) = camera.single_mut() else {
    return;
  };
  let Projection::Orthographic(ref mut ortho) = *projection else {
    return;
  };
  for event in wheel.read() {
    let lines = match event.unit {
      MouseScrollUnit::Line => event.y,
      MouseScrollUnit::Pixel => event.y / 40.0,
    };
    ortho.scale = (ortho.scale * 0.9_f32.powf(lines)).clamp(0.1, 20.0);
  }
}

fn server_input(
  keys: Res<ButtonInput<KeyCode>>,
  registry: Res<TileServerRegistry>,
  config: Res<TileWorldConfig>,
  mut world: ResMut<TileWorld>,
  mut queue: ResMut<PresentationQueue>,
  mut selected: Local<usize>,
) {
  let streamer = world.streamer_mut();

  if keys.just_pressed(KeyCode::Tab) && !registry.is_empty() {
    *selected = (*selected + 1) % registry.len();
    match registry.create_index(*selected, config.world_seed) {
      Ok(server) => {
        if let Err(err) = streamer.set_tile_server(server, &mut *queue) {
          warn!("Cannot switch tile server: {err}");
        }
      }
      Err(err) => warn!("{err}"),
    }
  }

  if keys.just_pressed(KeyCode::KeyR) {
    streamer.rerender_all(&mut *queue);
  }

  if keys.just_pressed(KeyCode::KeyG)
    && let Some(SettingValue::Bool(show)) = streamer.server().get_setting("show_grid")
    && let Err(err) = streamer.apply_setting("show_grid", SettingValue::Bool(!show), &mut *queue)
  {
    warn!("{err}");
  }
}

fn inspect_input(
  buttons: Res<ButtonInput<MouseButton>>,
  window: Query<&Window, With<PrimaryWindow>>,
  camera: Query<(&Camera, &GlobalTransform), With<TileCamera>>,
  world: Res<TileWorld>,
) {
  if !buttons.just_pressed(MouseButton::Left) {
    return;
  }
  let (Ok(window), Ok((camera, transform))) = (window.single(), camera.single()) else {
    return;
  };
  let Some(cursor) = window.cursor_position() else {
    return;
  };
  let Ok(position) = camera.viewport_to_world_2d(transform, cursor) else {
    return;
  };

  let info = world.streamer().position_info(position);
  match info.long_description {
    Some(description) => info!("{} {description}", info.coords),
    None => info!("{} (not loaded)", info.coords),
  }
  let stats = world.streamer().stats();
  info!(
    "{} tiles live, {} loaded / {} unloaded overall, suffix '{}'",
    stats.total,
    stats.loaded_overall,
    stats.unloaded_overall,
    world.streamer().diagnostic_suffix()
  );
}
