//! E2E tests for the tile streaming lifecycle.
//!
//! Drives a `TileStreamer` with a manual clock against a counting tile server
//! and a sink that checks every presentation call for consistency.
//!
//! Run: cargo test -p bevy_tile_world --test streaming_e2e

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bevy::math::Vec2;
use bevy_tile_world::{
  GenerationError, ManualClock, PresentationSink, RgbaSurface, SettingDescriptor, SettingError,
  SettingKind, SettingValue, TestPatternServer, Tile, TileCoord, TileGeometry, TileId,
  TilePayload, TileRenderer, TileServer, TileServerChanged, TileStreamer, TileWorldConfig, rgb,
};

const L: i32 = 64;

struct Gate {
  open: Mutex<bool>,
  opened: Condvar,
}

impl Gate {
  fn new(open: bool) -> Self {
    Self {
      open: Mutex::new(open),
      opened: Condvar::new(),
    }
  }

  fn wait(&self) {
    let mut open = self.open.lock().unwrap();
    while !*open {
      open = self.opened.wait(open).unwrap();
    }
  }

  fn open(&self) {
    *self.open.lock().unwrap() = true;
    self.opened.notify_all();
  }
}

const COUNTING_SETTINGS: &[SettingDescriptor] = &[
  SettingDescriptor {
    key: "detail",
    description: "Detail level",
    kind: SettingKind::Console,
    rerender_on_change: true,
  },
  SettingDescriptor {
    key: "show labels",
    description: "Show labels",
    kind: SettingKind::Menu,
    rerender_on_change: false,
  },
];

/// Counts generations per coordinate. Payload is the detail level.
struct CountingServer {
  generated: Mutex<HashMap<TileCoord, usize>>,
  gate: Gate,
  fail_at: Option<TileCoord>,
  detail: AtomicI64,
  labels: AtomicBool,
}

impl CountingServer {
  fn new() -> Self {
    Self {
      generated: Mutex::new(HashMap::new()),
      gate: Gate::new(true),
      fail_at: None,
      detail: AtomicI64::new(1),
      labels: AtomicBool::new(true),
    }
  }

  fn gated() -> Self {
    Self {
      gate: Gate::new(false),
      ..Self::new()
    }
  }

  fn count(&self, coord: TileCoord) -> usize {
    self.generated.lock().unwrap().get(&coord).copied().unwrap_or(0)
  }

  fn total(&self) -> usize {
    self.generated.lock().unwrap().values().sum()
  }
}

impl TileServer for CountingServer {
  fn name(&self) -> &str {
    "counting"
  }

  fn geometry(&self) -> TileGeometry {
    TileGeometry::new(L, 4)
  }

  fn generate(&self, coord: TileCoord) -> Result<TilePayload, GenerationError> {
    self.gate.wait();
    *self.generated.lock().unwrap().entry(coord).or_default() += 1;
    if self.fail_at == Some(coord) {
      return Err(GenerationError::failed("bad tile"));
    }
    Ok(Box::new(self.detail.load(Ordering::SeqCst)))
  }

  fn renderer(&self) -> &dyn TileRenderer {
    self
  }

  fn settings(&self) -> &'static [SettingDescriptor] {
    COUNTING_SETTINGS
  }

  fn get_setting(&self, key: &str) -> Option<SettingValue> {
    match key {
      "detail" => Some(SettingValue::Int(self.detail.load(Ordering::SeqCst))),
      "show labels" => Some(SettingValue::Bool(self.labels.load(Ordering::SeqCst))),
      _ => None,
    }
  }

  fn set_setting(&self, key: &str, value: SettingValue) -> Result<(), SettingError> {
    match (key, value) {
      ("detail", SettingValue::Int(detail)) => self.detail.store(detail, Ordering::SeqCst),
      ("show labels", SettingValue::Bool(show)) => self.labels.store(show, Ordering::SeqCst),
      _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
  }
}

impl TileRenderer for CountingServer {
  fn render_image(&self, _tile: &Tile) -> RgbaSurface {
    RgbaSurface::filled(4, 4, rgb(10, 20, 30))
  }

  fn short_label(&self, tile: &Tile, local: Vec2) -> String {
    format!("tile {} at {:.1},{:.1}", tile.coord(), local.x, local.y)
  }
}

#[derive(Debug)]
struct Shown {
  offset: Vec2,
  scale: f32,
  alpha: f32,
}

/// Sink that panics on any inconsistent presentation call.
#[derive(Default)]
struct RecordingSink {
  visible: HashMap<TileId, Shown>,
  shown_total: usize,
  removed: usize,
  finished: usize,
  odd_finished: usize,
}

impl RecordingSink {
  fn offsets(&self) -> HashSet<(i32, i32)> {
    self
      .visible
      .values()
      .map(|s| (s.offset.x as i32, s.offset.y as i32))
      .collect()
  }
}

impl PresentationSink for RecordingSink {
  fn show(&mut self, id: TileId, _image: RgbaSurface, world_offset: Vec2, scale: f32) {
    let previous = self.visible.insert(
      id,
      Shown {
        offset: world_offset,
        scale,
        alpha: 0.0,
      },
    );
    assert!(previous.is_none(), "tile {id} shown twice");
    self.shown_total += 1;
  }

  fn set_opacity(&mut self, id: TileId, alpha: f32) {
    let shown = self.visible.get_mut(&id).expect("opacity for a tile never shown");
    assert!(alpha >= shown.alpha, "fade of {id} went backwards");
    assert!(alpha <= 1.0);
    shown.alpha = alpha;
  }

  fn fade_finished(&mut self, id: TileId, odd: bool) {
    let shown = &self.visible[&id];
    assert_eq!(shown.alpha, 1.0);
    self.finished += 1;
    if odd {
      self.odd_finished += 1;
    }
  }

  fn remove(&mut self, id: TileId) {
    assert!(self.visible.remove(&id).is_some(), "removed {id} twice");
    self.removed += 1;
  }
}

/// 2x2 tile screen at the origin with a one tile margin.
fn config(synchronous: bool) -> TileWorldConfig {
  TileWorldConfig {
    screen_top_left: [0.0, 0.0],
    screen_size: [128, 128],
    offscreen_margin: [1, 1],
    generate_synchronously: synchronous,
    worker_threads: 4,
    fade_in_ms: 600,
    ..Default::default()
  }
}

struct Harness {
  streamer: TileStreamer,
  server: Arc<CountingServer>,
  clock: Arc<ManualClock>,
  sink: RecordingSink,
}

impl Harness {
  fn new(server: CountingServer, synchronous: bool) -> Self {
    let server = Arc::new(server);
    let clock = Arc::new(ManualClock::new(0.0));
    let streamer = TileStreamer::new(&config(synchronous), server.clone(), clock.clone()).unwrap();
    Self {
      streamer,
      server,
      clock,
      sink: RecordingSink::default(),
    }
  }

  fn tick(&mut self) {
    self.clock.advance(0.1);
    self.streamer.tick(&mut self.sink);
  }

  fn move_to(&mut self, x: f32, y: f32) {
    self
      .streamer
      .set_screen_top_left(Vec2::new(x, y))
      .unwrap();
    self.tick();
  }

  fn tick_until(&mut self, mut done: impl FnMut(&Self) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(self) {
      assert!(Instant::now() < deadline, "timed out waiting for tiles");
      std::thread::sleep(Duration::from_millis(1));
      self.tick();
    }
  }

  fn grid_coords(&self) -> Vec<TileCoord> {
    self.streamer.window().slots().map(|d| d.coord()).collect()
  }
}

#[test]
fn two_by_two_screen_streams_sixteen_tiles() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();

  let stats = h.streamer.stats();
  assert_eq!((stats.loaded, stats.unloaded, stats.total), (16, 0, 16));
  assert_eq!(h.sink.visible.len(), 16);

  let expected: HashSet<_> = [-64, 0, 64, 128]
    .into_iter()
    .flat_map(|x| [64, 0, -64, -128].map(|y| (x, y)))
    .collect();
  assert_eq!(h.sink.offsets(), expected);
  for &(x, y) in &expected {
    assert_eq!(h.server.count(TileCoord::new(x, y)), 1);
  }
  assert!(h.sink.visible.values().all(|s| s.scale == 16.0));
}

#[test]
fn oscillating_viewport_does_not_thrash() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();
  assert_eq!(h.streamer.stats().loaded_overall, 16);

  for _ in 0..20 {
    for (x, y) in [(-32.0, 0.0), (0.0, 32.0), (32.0, 0.0), (16.0, -32.0)] {
      h.move_to(x, y);
    }
  }

  assert_eq!(h.streamer.stats().loaded_overall, 16);
  assert_eq!(h.streamer.stats().unloaded_overall, 0);
  assert_eq!(h.server.total(), 16);
  assert_eq!(h.sink.visible.len(), 16);
}

#[test]
fn distant_jump_replaces_every_tile() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();
  let old: HashSet<_> = h.sink.offsets();

  h.move_to(50_000.0, -50_000.0);

  assert_eq!(h.streamer.stats().unloaded, 16);
  assert_eq!(h.sink.removed, 16);
  assert_eq!(h.sink.visible.len(), h.streamer.stats().total);
  assert!(h.sink.offsets().is_disjoint(&old));
}

#[test]
fn tiles_unloaded_before_completion_are_never_presented() {
  let mut h = Harness::new(CountingServer::gated(), false);
  h.tick();
  let old = h.grid_coords();
  assert_eq!(old.len(), 16);
  assert!(h.sink.visible.is_empty());

  h.move_to(10_000.0, 0.0);
  assert_eq!(h.streamer.stats().unloaded, 16);
  h.server.gate.open();

  // Abandoned units leave the cache once their generation returns.
  h.tick_until(|h| {
    h.server.total() == 32
      && h.sink.visible.len() == 16
      && old.iter().all(|c| !h.streamer.cache().contains(*c))
  });

  assert_eq!(h.sink.shown_total, 16);
  assert_eq!(h.sink.removed, 0);
  let new: HashSet<_> = h.grid_coords().into_iter().collect();
  for coord in &old {
    assert!(!new.contains(coord));
    assert_eq!(h.server.count(*coord), 1, "generation is not cancelled");
    assert!(!h.streamer.cache().contains(*coord), "{coord} was cached");
  }
  assert_eq!(h.streamer.cache().len(), 16);
}

#[test]
fn fade_in_reaches_full_opacity() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();
  assert!(h.sink.visible.values().all(|s| s.alpha == 0.0));

  for _ in 0..3 {
    h.tick();
  }
  assert!(h.sink.visible.values().all(|s| s.alpha > 0.0 && s.alpha < 1.0));
  assert_eq!(h.streamer.fading(), 16);

  for _ in 0..4 {
    h.tick();
  }
  assert!(h.sink.visible.values().all(|s| s.alpha == 1.0));
  assert_eq!(h.sink.finished, 16);
  assert_eq!(h.sink.odd_finished, 8);
  assert_eq!(h.streamer.fading(), 0);
}

#[test]
fn failed_tile_leaves_gap_and_is_not_retried() {
  let bad = TileCoord::new(0, 0);
  let server = CountingServer {
    fail_at: Some(bad),
    ..CountingServer::new()
  };
  let mut h = Harness::new(server, true);
  h.tick();

  assert_eq!(h.sink.visible.len(), 15);
  assert!(!h.sink.offsets().contains(&(0, 0)));
  assert_eq!(h.streamer.stats().failed_overall, 1);

  h.streamer.rerender_all(&mut h.sink);
  h.tick();
  assert_eq!(h.sink.visible.len(), 15);
  assert_eq!(h.server.count(bad), 1);
}

#[test]
fn switching_server_replaces_tiles() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();

  h.streamer
    .set_tile_server(Arc::new(TestPatternServer::new(9)), &mut h.sink)
    .unwrap();
  assert_eq!(h.sink.removed, 16);
  assert!(h.sink.visible.is_empty());
  assert_eq!(h.streamer.diagnostic_suffix(), "Test pattern-b1-grid");
  assert_eq!(
    h.streamer.take_server_changes(),
    vec![TileServerChanged {
      old: "counting".into(),
      new: "Test pattern".into(),
    }]
  );
  assert!(h.streamer.take_server_changes().is_empty());

  h.tick();
  assert_eq!(h.sink.visible.len(), 16);
  assert!(h.sink.visible.values().all(|s| s.scale == 4.0));
  assert_eq!(h.server.total(), 16);
}

#[test]
fn flagged_settings_discard_cached_tiles() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();

  h.streamer
    .run_console_command("showlabels off", &mut h.sink)
    .unwrap();
  assert_eq!(h.server.get_setting("show labels"), Some(SettingValue::Bool(false)));
  assert_eq!(h.sink.removed, 0);

  h.streamer
    .run_console_command("detail 3", &mut h.sink)
    .unwrap();
  assert_eq!(h.sink.removed, 16);
  assert!(h.streamer.cache().is_empty());

  h.tick();
  assert_eq!(h.sink.visible.len(), 16);
  assert_eq!(h.server.count(TileCoord::new(0, 0)), 2);
  let tile = h.streamer.window().slots().next().unwrap().tile().unwrap().clone();
  assert_eq!(tile.payload::<i64>(), Some(&3));

  assert!(matches!(
    h.streamer.run_console_command("detail lots", &mut h.sink),
    Err(SettingError::TypeMismatch { .. })
  ));
}

#[test]
fn settings_change_restarts_running_generations() {
  let mut h = Harness::new(CountingServer::gated(), false);
  h.tick();
  let before: Vec<_> = h.streamer.window().slots().cloned().collect();
  assert_eq!(before.len(), 16);

  h.streamer
    .run_console_command("detail 3", &mut h.sink)
    .unwrap();
  h.server.gate.open();

  // Every tile generates twice: once for the abandoned request, once anew.
  h.tick_until(|h| h.server.total() == 32 && h.sink.visible.len() == 16);

  assert!(before.iter().all(|t| t.is_unwanted()));
  assert_eq!(h.server.count(TileCoord::new(0, 0)), 2);
  assert_eq!(h.sink.shown_total, 16);
  assert_eq!(h.streamer.cache().len(), 16);
  let tile = h.streamer.window().slots().next().unwrap().tile().unwrap().clone();
  assert_eq!(tile.payload::<i64>(), Some(&3));
}

#[test]
fn position_info_describes_tile_under_cursor() {
  let mut h = Harness::new(CountingServer::new(), true);
  h.tick();

  let info = h.streamer.position_info(Vec2::new(8.0, 8.0));
  assert_eq!(info.coords, "[8, 8]");
  assert_eq!(
    info.short_description.as_deref(),
    Some("tile [0, 64] at 0.5,3.5")
  );
}
