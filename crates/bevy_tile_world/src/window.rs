//! Sliding tile grid.
//!
//! [`TileWindow`] keeps a rectangular grid of slots covering the screen
//! rectangle plus an offscreen margin. When the viewport moves, whole rows
//! and columns are inserted on the leading edges and removed from the
//! trailing ones. Slot contents are opaque to the window: a [`SlotSource`]
//! creates them on load and disposes of them on unload.
//!
//! # Grid layout
//!
//! ```text
//!   anchor (rows[0][0]) = top-left corner, highest Y
//!   ┌────┬────┬────┐
//!   │0,0 │0,1 │0,2 │   row index grows as world Y decreases
//!   ├────┼────┼────┤
//!   │1,0 │1,1 │1,2 │   column index grows with world X
//!   └────┴────┴────┘
//! ```
//!
//! Invariants: every row has the same length, and an empty grid has zero
//! rows (never a row with zero slots), so the anchor always exists while
//! the grid is non-empty.

use std::collections::VecDeque;

use bevy::log::debug;
use bevy::math::{UVec2, Vec2};

use crate::coords::{TileCoord, WorldRect};
use crate::error::ConfigError;

/// Anything the window can hold in a slot.
pub trait GridSlot {
  /// Top-left corner of the tile this slot stands for.
  fn coord(&self) -> TileCoord;
}

impl GridSlot for TileCoord {
  fn coord(&self) -> TileCoord {
    *self
  }
}

/// Creates and disposes of slot contents.
pub trait SlotSource<S> {
  /// Creates the slot for the tile whose top-left corner is `at`.
  fn load(&mut self, at: Vec2) -> S;

  /// Disposes of a slot that left the grid.
  fn unload(&mut self, slot: S);
}

/// Visible region and how much of its surroundings to keep loaded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
  /// World position of the screen's top-left corner.
  pub top_left: Vec2,
  /// Screen size in pixels.
  pub size: UVec2,
  /// Pixels per world unit.
  pub scale: f32,
  /// Offscreen columns (x) and rows (y) kept on each side.
  pub margin: UVec2,
}

impl Viewport {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.top_left.is_finite() {
      return Err(ConfigError::ScreenPosition {
        x: self.top_left.x,
        y: self.top_left.y,
      });
    }
    if self.size.x == 0 || self.size.y == 0 {
      return Err(ConfigError::ScreenSize {
        width: self.size.x,
        height: self.size.y,
      });
    }
    if !self.scale.is_finite() || self.scale <= 0.0 {
      return Err(ConfigError::ScreenScale(self.scale));
    }
    Ok(())
  }

  /// Screen rectangle in world units.
  pub fn screen_rect(&self) -> WorldRect {
    WorldRect::new(self.top_left, self.size.as_vec2() / self.scale)
  }
}

impl Default for Viewport {
  fn default() -> Self {
    Self {
      top_left: Vec2::new(-320.0, 120.0),
      size: UVec2::new(640, 240),
      scale: 1.0,
      margin: UVec2::new(4, 4),
    }
  }
}

/// Loads and unloads performed by one update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridChange {
  pub loaded: usize,
  pub unloaded: usize,
}

impl GridChange {
  pub fn is_empty(&self) -> bool {
    self.loaded == 0 && self.unloaded == 0
  }
}

#[derive(Clone, Copy, Debug)]
enum Side {
  Top,
  Bottom,
  Left,
  Right,
}

/// Rectangular grid of slots following a viewport.
pub struct TileWindow<S> {
  rows: VecDeque<VecDeque<S>>,
  tile_length: i32,
  viewport: Viewport,
  min_interval: f64,
  last_update: f64,
  update_required: bool,
}

impl<S: GridSlot> TileWindow<S> {
  pub fn new(tile_length: i32, viewport: Viewport) -> Result<Self, ConfigError> {
    validate_tile_length(tile_length)?;
    viewport.validate()?;
    Ok(Self {
      rows: VecDeque::new(),
      tile_length,
      viewport,
      min_interval: 0.05,
      last_update: f64::NEG_INFINITY,
      update_required: true,
    })
  }

  /// Sets the minimum time between two rate-limited updates.
  pub fn with_min_interval(mut self, secs: f64) -> Result<Self, ConfigError> {
    self.set_min_interval(secs)?;
    Ok(self)
  }

  pub fn set_min_interval(&mut self, secs: f64) -> Result<(), ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
      return Err(ConfigError::UpdateInterval(secs));
    }
    self.min_interval = secs;
    Ok(())
  }

  pub fn viewport(&self) -> &Viewport {
    &self.viewport
  }

  pub fn tile_length(&self) -> i32 {
    self.tile_length
  }

  /// Replaces the viewport, requesting an update if it changed.
  pub fn set_viewport(&mut self, viewport: Viewport) -> Result<(), ConfigError> {
    viewport.validate()?;
    if viewport != self.viewport {
      self.viewport = viewport;
      self.update_required = true;
    }
    Ok(())
  }

  pub fn set_screen_top_left(&mut self, top_left: Vec2) -> Result<(), ConfigError> {
    self.set_viewport(Viewport {
      top_left,
      ..self.viewport
    })
  }

  pub fn set_screen_size(&mut self, size: UVec2) -> Result<(), ConfigError> {
    self.set_viewport(Viewport {
      size,
      ..self.viewport
    })
  }

  pub fn set_screen_scale(&mut self, scale: f32) -> Result<(), ConfigError> {
    self.set_viewport(Viewport {
      scale,
      ..self.viewport
    })
  }

  pub fn set_margin(&mut self, margin: UVec2) -> Result<(), ConfigError> {
    self.set_viewport(Viewport {
      margin,
      ..self.viewport
    })
  }

  /// Changes the tile size. Existing slots are laid out on the old length,
  /// so the whole grid is unloaded first.
  pub fn set_tile_length(
    &mut self,
    tile_length: i32,
    source: &mut impl SlotSource<S>,
  ) -> Result<GridChange, ConfigError> {
    validate_tile_length(tile_length)?;
    let change = self.drop_all(source);
    self.tile_length = tile_length;
    self.update_required = true;
    Ok(change)
  }

  /// Forces the next [`Self::poll_update`] to recompute.
  pub fn request_update(&mut self) {
    self.update_required = true;
  }

  pub fn update_required(&self) -> bool {
    self.update_required
  }

  /// Recomputes the grid if an update is pending and the minimum interval
  /// has passed since the previous one.
  pub fn poll_update(
    &mut self,
    now: f64,
    source: &mut impl SlotSource<S>,
  ) -> Option<GridChange> {
    if !self.update_required || self.last_update + self.min_interval >= now {
      return None;
    }
    self.last_update = now;
    self.update_required = false;
    Some(self.update(source))
  }

  /// World rectangle the grid must cover: screen plus margin.
  pub fn target_rect(&self) -> WorldRect {
    let margin = self.viewport.margin.as_vec2() * self.tile_length as f32;
    self.viewport.screen_rect().expand(margin)
  }

  /// Recomputes the grid immediately.
  #[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
  pub fn update(&mut self, source: &mut impl SlotSource<S>) -> GridChange {
    let mut change = GridChange::default();
    let target = self.target_rect();

    if let Some(coverage) = self.coverage() {
      if !coverage.touches(&target) {
        debug!("Viewport jumped away from loaded tiles, dropping grid");
        self.remove_rows(Side::Top, self.rows.len(), source, &mut change);
      }
    }

    self.fit(target, source, &mut change);
    if self.rows.is_empty() {
      // Retraction consumed every row; a fresh seed lies inside the target
      // so the second pass only grows.
      self.fit(target, source, &mut change);
    }

    debug!(
      "Tile grid {}x{}: {} loaded, {} unloaded",
      self.columns(),
      self.rows(),
      change.loaded,
      change.unloaded
    );
    change
  }

  /// Grows or trims each edge of the grid.
  ///
  /// A freshly seeded grid grows straight to `target`. An existing grid only
  /// grows an edge once the screen itself passes it, and then out to the
  /// margin, so views moving inside the margin load nothing.
  fn fit(&mut self, target: WorldRect, source: &mut impl SlotSource<S>, change: &mut GridChange) {
    let fresh = self.rows.is_empty();
    if fresh {
      let seed = TileCoord::containing(target.top_left, self.tile_length);
      self.rows.push_back(VecDeque::from([source.load(seed.as_vec2())]));
      change.loaded += 1;
    }
    let Some(coverage) = self.coverage() else {
      return;
    };

    let screen = self.viewport.screen_rect();
    let length = self.tile_length as f32;
    let margin = self.viewport.margin.as_ivec2();
    let needed = |target_gap: f32, screen_gap: f32, margin: i32| {
      let n = (target_gap / length).ceil() as i32;
      if n < 0 {
        (n + margin).min(0)
      } else if fresh || screen_gap > 0.0 {
        n
      } else {
        0
      }
    };
    let top = needed(
      target.top() - coverage.top(),
      screen.top() - coverage.top(),
      margin.y,
    );
    let bottom = needed(
      coverage.bottom() - target.bottom(),
      coverage.bottom() - screen.bottom(),
      margin.y,
    );
    let left = needed(
      coverage.left() - target.left(),
      coverage.left() - screen.left(),
      margin.x,
    );
    let right = needed(
      target.right() - coverage.right(),
      screen.right() - coverage.right(),
      margin.x,
    );

    self.resize_rows(Side::Top, top, source, change);
    self.resize_rows(Side::Bottom, bottom, source, change);
    self.resize_columns(Side::Left, left, source, change);
    self.resize_columns(Side::Right, right, source, change);
  }

  fn resize_rows(
    &mut self,
    side: Side,
    amount: i32,
    source: &mut impl SlotSource<S>,
    change: &mut GridChange,
  ) {
    if amount < 0 {
      self.remove_rows(side, amount.unsigned_abs() as usize, source, change);
      return;
    }
    for _ in 0..amount {
      let (Some(neighbour), columns) = (self.edge_row_anchor(side), self.columns()) else {
        return;
      };
      let step = match side {
        Side::Top => self.tile_length,
        _ => -self.tile_length,
      };
      let row: VecDeque<S> = (0..columns as i32)
        .map(|col| {
          let at = TileCoord::new(neighbour.x + col * self.tile_length, neighbour.y + step);
          source.load(at.as_vec2())
        })
        .collect();
      change.loaded += row.len();
      match side {
        Side::Top => self.rows.push_front(row),
        _ => self.rows.push_back(row),
      }
    }
  }

  fn edge_row_anchor(&self, side: Side) -> Option<TileCoord> {
    let row = match side {
      Side::Top => self.rows.front(),
      _ => self.rows.back(),
    }?;
    row.front().map(GridSlot::coord)
  }

  fn remove_rows(
    &mut self,
    side: Side,
    count: usize,
    source: &mut impl SlotSource<S>,
    change: &mut GridChange,
  ) {
    for _ in 0..count {
      let row = match side {
        Side::Top => self.rows.pop_front(),
        _ => self.rows.pop_back(),
      };
      let Some(row) = row else {
        return;
      };
      for slot in row {
        source.unload(slot);
        change.unloaded += 1;
      }
    }
  }

  fn resize_columns(
    &mut self,
    side: Side,
    amount: i32,
    source: &mut impl SlotSource<S>,
    change: &mut GridChange,
  ) {
    if amount < 0 {
      self.remove_columns(side, amount.unsigned_abs() as usize, source, change);
      return;
    }
    for _ in 0..amount {
      let neighbour = match side {
        Side::Left => self.rows.front().and_then(|r| r.front()),
        _ => self.rows.front().and_then(|r| r.back()),
      };
      let Some(neighbour) = neighbour.map(GridSlot::coord) else {
        return;
      };
      let x = match side {
        Side::Left => neighbour.x - self.tile_length,
        _ => neighbour.x + self.tile_length,
      };
      let mut y = neighbour.y;
      for row in self.rows.iter_mut() {
        let slot = source.load(TileCoord::new(x, y).as_vec2());
        match side {
          Side::Left => row.push_front(slot),
          _ => row.push_back(slot),
        }
        change.loaded += 1;
        y -= self.tile_length;
      }
    }
  }

  fn remove_columns(
    &mut self,
    side: Side,
    count: usize,
    source: &mut impl SlotSource<S>,
    change: &mut GridChange,
  ) {
    for _ in 0..count {
      if self.columns() == 0 {
        break;
      }
      for row in self.rows.iter_mut() {
        let slot = match side {
          Side::Left => row.pop_front(),
          _ => row.pop_back(),
        };
        if let Some(slot) = slot {
          source.unload(slot);
          change.unloaded += 1;
        }
      }
    }
    if self.columns() == 0 {
      self.rows.clear();
    }
  }

  /// Unloads every slot, leaving an empty grid.
  pub fn drop_all(&mut self, source: &mut impl SlotSource<S>) -> GridChange {
    let mut change = GridChange::default();
    self.remove_rows(Side::Top, self.rows.len(), source, &mut change);
    change
  }

  /// World rectangle currently covered by the grid.
  pub fn coverage(&self) -> Option<WorldRect> {
    let anchor = self.anchor()?;
    let length = self.tile_length as f32;
    Some(WorldRect::new(
      anchor.as_vec2(),
      Vec2::new(self.columns() as f32 * length, self.rows() as f32 * length),
    ))
  }

  /// Top-left slot's coordinate.
  pub fn anchor(&self) -> Option<TileCoord> {
    self.rows.front()?.front().map(GridSlot::coord)
  }

  /// Slot covering `world`, if it lies inside the grid.
  pub fn tile_at(&self, world: Vec2) -> Option<&S> {
    let anchor = self.anchor()?.as_vec2();
    let length = self.tile_length as f32;
    let row = ((anchor.y - world.y) / length).floor();
    let col = ((world.x - anchor.x) / length).floor();
    if row < 0.0 || col < 0.0 {
      return None;
    }
    self.rows.get(row as usize)?.get(col as usize)
  }

  pub fn rows(&self) -> usize {
    self.rows.len()
  }

  pub fn columns(&self) -> usize {
    self.rows.front().map_or(0, VecDeque::len)
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Iterates over rows, top to bottom.
  pub fn iter_rows(&self) -> impl Iterator<Item = &VecDeque<S>> {
    self.rows.iter()
  }

  /// Iterates over every slot, row by row.
  pub fn slots(&self) -> impl Iterator<Item = &S> {
    self.rows.iter().flatten()
  }
}

fn validate_tile_length(tile_length: i32) -> Result<(), ConfigError> {
  if tile_length <= 0 {
    Err(ConfigError::TileLength(tile_length))
  } else {
    Ok(())
  }
}
