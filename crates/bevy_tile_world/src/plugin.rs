//! Bevy integration.
//!
//! [`TileWorldPlugin`] builds a [`TileStreamer`] when added and drives it
//! once per frame from Bevy's [`Time`]. An invalid configuration panics in
//! `build`. Tile server switches are announced as [`TileServerChanged`]
//! messages. Presentation calls are queued in
//! [`PresentationQueue`] and applied as sprite entities tagged with
//! [`TileSprite`]. Without an `Assets<Image>` resource (headless apps) the
//! entities are still spawned, just without a sprite.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::asset::RenderAssetUsages;
use bevy::ecs::message::MessageWriter;
use bevy::image::ImageSampler;
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};

use crate::clock::ManualClock;
use crate::config::TileWorldConfig;
use crate::deferred::TileId;
use crate::presentation::{PresentationCommand, PresentationQueue};
use crate::registry::TileServerRegistry;
use crate::server::TileServer;
use crate::streamer::{TileServerChanged, TileStreamer};
use crate::surface::RgbaSurface;
use crate::window::Viewport;

/// Streams tiles from `server` into the world.
pub struct TileWorldPlugin {
  pub config: TileWorldConfig,
  pub server: Arc<dyn TileServer>,
}

impl TileWorldPlugin {
  pub fn new(server: Arc<dyn TileServer>) -> Self {
    Self {
      config: TileWorldConfig::default(),
      server,
    }
  }

  pub fn with_config(mut self, config: TileWorldConfig) -> Self {
    self.config = config;
    self
  }
}

/// Marker for the camera whose orthographic view drives the viewport.
#[derive(Component)]
pub struct TileCamera;

/// Entity showing one tile.
#[derive(Component, Debug)]
pub struct TileSprite {
  pub id: TileId,
}

/// Current fade-in opacity of a tile sprite.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct TileFade(pub f32);

/// Tile whose fade finished on an odd chequerboard square.
#[derive(Component, Debug)]
pub struct OddTile;

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileWorldSet;

/// The running streamer and the clock it reads.
#[derive(Resource)]
pub struct TileWorld {
  streamer: TileStreamer,
  clock: Arc<ManualClock>,
}

impl TileWorld {
  pub fn streamer(&self) -> &TileStreamer {
    &self.streamer
  }

  pub fn streamer_mut(&mut self) -> &mut TileStreamer {
    &mut self.streamer
  }

  pub fn clock(&self) -> &Arc<ManualClock> {
    &self.clock
  }
}

/// Tile sprite entities by presentation key.
#[derive(Resource, Default)]
pub struct TileSprites(HashMap<TileId, Entity>);

impl TileSprites {
  pub fn get(&self, id: TileId) -> Option<Entity> {
    self.0.get(&id).copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl Plugin for TileWorldPlugin {
  fn build(&self, app: &mut App) {
    let clock = Arc::new(ManualClock::default());
    let streamer = match TileStreamer::new(&self.config, self.server.clone(), clock.clone()) {
      Ok(streamer) => streamer,
      Err(err) => panic!("Invalid tile world configuration: {err}"),
    };

    app
      .insert_resource(self.config.clone())
      .insert_resource(TileWorld { streamer, clock })
      .init_resource::<PresentationQueue>()
      .init_resource::<TileSprites>()
      .add_message::<TileServerChanged>();

    if !app.world().contains_resource::<TileServerRegistry>() {
      app.insert_resource(TileServerRegistry::with_builtin());
    }

    app.add_systems(
      Update,
      (
        sync_viewport_from_camera,
        tick_tile_world,
        apply_presentation,
        apply_tile_fade,
      )
        .chain()
        .in_set(TileWorldSet),
    );
  }
}

/// Follows the [`TileCamera`]'s orthographic view.
#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
fn sync_viewport_from_camera(
  camera: Query<(&GlobalTransform, &Projection), With<TileCamera>>,
  mut world: ResMut<TileWorld>,
) {
  let Ok((transform, projection)) = camera.single() else {
    return;
  };
  let Projection::Orthographic(ortho) = projection else {
    return;
  };
  // Bevy computes the area after the first frame.
  let area = ortho.area;
  if area.width() <= 0.0 || area.height() <= 0.0 {
    return;
  }

  let scale = 1.0 / ortho.scale;
  let camera_pos = transform.translation().truncate();
  let viewport = Viewport {
    top_left: camera_pos + Vec2::new(area.min.x, area.max.y),
    size: (area.size() * scale).round().as_uvec2(),
    scale,
    margin: world.streamer.viewport().margin,
  };
  if let Err(err) = world.streamer.set_viewport(viewport) {
    warn!("Ignoring camera view: {err}");
  }
}

#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
fn tick_tile_world(
  time: Res<Time>,
  mut world: ResMut<TileWorld>,
  mut queue: ResMut<PresentationQueue>,
  mut server_changes: MessageWriter<TileServerChanged>,
) {
  world.clock.set(time.elapsed_secs_f64());
  world.streamer.tick(&mut *queue);
  for change in world.streamer.take_server_changes() {
    server_changes.write(change);
  }
}

#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
fn apply_presentation(
  mut commands: Commands,
  mut queue: ResMut<PresentationQueue>,
  mut sprites: ResMut<TileSprites>,
  mut images: Option<ResMut<Assets<Image>>>,
) {
  for command in queue.drain() {
    match command {
      PresentationCommand::Show {
        id,
        image,
        world_offset,
        scale,
      } => {
        let extent = Vec2::new(image.width() as f32, -(image.height() as f32)) * scale;
        let transform = Transform::from_translation((world_offset + extent / 2.0).extend(0.0))
          .with_scale(Vec3::new(scale, scale, 1.0));
        let mut entity = commands.spawn((TileSprite { id }, TileFade(0.0), transform));
        if let Some(images) = images.as_mut() {
          let handle = images.add(surface_image(&image));
          entity.insert(Sprite {
            color: Color::srgba(1.0, 1.0, 1.0, 0.0),
            ..Sprite::from_image(handle)
          });
        }
        let entity = entity.id();
        if let Some(stale) = sprites.0.insert(id, entity) {
          commands.entity(stale).despawn();
        }
      }
      PresentationCommand::Opacity { id, alpha } => {
        if let Some(&entity) = sprites.0.get(&id) {
          commands.entity(entity).try_insert(TileFade(alpha));
        }
      }
      PresentationCommand::FadeFinished { id, odd } => {
        if odd && let Some(&entity) = sprites.0.get(&id) {
          commands.entity(entity).try_insert(OddTile);
        }
      }
      PresentationCommand::Remove { id } => {
        if let Some(entity) = sprites.0.remove(&id) {
          commands.entity(entity).despawn();
        }
      }
    }
  }
}

fn apply_tile_fade(mut sprites: Query<(&TileFade, &mut Sprite), Changed<TileFade>>) {
  for (fade, mut sprite) in &mut sprites {
    sprite.color = Color::srgba(1.0, 1.0, 1.0, fade.0);
  }
}

/// Converts rendered tile imagery into a sampled-nearest texture.
pub fn surface_image(surface: &RgbaSurface) -> Image {
  let size = Extent3d {
    width: surface.width(),
    height: surface.height(),
    depth_or_array_layers: 1,
  };
  let mut image = Image::new(
    size,
    TextureDimension::D2,
    surface.as_bytes().to_vec(),
    TextureFormat::Rgba8UnormSrgb,
    RenderAssetUsages::MAIN_WORLD | RenderAssetUsages::RENDER_WORLD,
  );
  image.sampler = ImageSampler::nearest();
  image
}
