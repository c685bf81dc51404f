//! Drives the engine the way a benchmark harness would: keep up to `iodepth`
//! units in flight, reap at least one whenever the queue is full, and
//! report throughput.
//!
//! ```sh
//! SYSLIO_IODEPTH=16 cargo run --example depth_bench -- 2048
//! ```

use std::{os::fd::AsRawFd, pin::Pin, ptr::NonNull, time::Instant};

use syslio::{
  DataDirection, EngineConfig, IoEngineOps, IoUnit, QueueStatus, SysletEngine,
};

const BLOCK: usize = 4096;

struct Stats {
  ios: usize,
  bytes: usize,
  short: usize,
  failed: usize,
  inline: usize,
}

/// Fixed pool of pinned units, one slot per queue position.
struct Slots {
  slots: Vec<Option<Pin<Box<IoUnit>>>>,
}

impl Slots {
  fn new(depth: usize) -> Self {
    Self { slots: (0..depth).map(|_| None).collect() }
  }

  fn free(&self) -> Option<usize> {
    self.slots.iter().position(Option::is_none)
  }

  fn retire(&mut self, done: NonNull<IoUnit>, stats: &mut Stats) {
    let slot = self
      .slots
      .iter()
      .position(|s| s.as_ref().is_some_and(|u| NonNull::from(&**u) == done));
    let Some(unit) = slot.and_then(|i| self.slots[i].take()) else {
      return;
    };

    stats.ios += 1;
    stats.bytes += unit.bytes_done();
    if unit.error() != 0 {
      stats.failed += 1;
    } else if unit.resid() != 0 {
      stats.short += 1;
    }
  }
}

fn reap<E: IoEngineOps>(
  engine: &mut E,
  slots: &mut Slots,
  stats: &mut Stats,
  min: usize,
) -> Result<(), syslio::EngineError> {
  let n = engine.getevents(min, usize::MAX, None)?;
  for i in 0..n {
    slots.retire(engine.event(i), stats);
  }
  Ok(())
}

fn pass<E: IoEngineOps>(
  engine: &mut E,
  depth: usize,
  fd: i32,
  ddir: DataDirection,
  blocks: u64,
) -> Result<Stats, Box<dyn std::error::Error>> {
  let mut slots = Slots::new(depth);
  let mut stats = Stats { ios: 0, bytes: 0, short: 0, failed: 0, inline: 0 };

  for block in 0..blocks {
    let index = match slots.free() {
      Some(index) => index,
      None => {
        reap(engine, &mut slots, &mut stats, 1)?;
        slots.free().ok_or("no slot freed by reap")?
      }
    };

    let offset = fastrand::u64(0..blocks) * BLOCK as u64;
    let unit = match ddir {
      DataDirection::Read => IoUnit::read(fd, BLOCK, offset),
      DataDirection::Write => IoUnit::write(fd, vec![block as u8; BLOCK], offset),
      DataDirection::Sync => IoUnit::sync(fd),
    };
    let unit = slots.slots[index].insert(Box::pin(unit));

    engine.prep(unit.as_mut());
    // SAFETY: the slot keeps the unit pinned until it is retired.
    if unsafe { engine.queue(unit.as_mut())? } == QueueStatus::Completed {
      stats.inline += 1;
    }
  }

  let outstanding = slots.slots.iter().filter(|s| s.is_some()).count();
  reap(engine, &mut slots, &mut stats, outstanding)?;
  Ok(stats)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let blocks: u64 = match std::env::args().nth(1) {
    Some(arg) => arg.parse()?,
    None => 1024,
  };
  let config = EngineConfig::from_env()?;
  let depth = config.get_iodepth();

  let file = tempfile::tempfile()?;
  file.set_len(blocks * BLOCK as u64)?;
  let mut engine = SysletEngine::threaded(&config)?;

  for ddir in [DataDirection::Write, DataDirection::Read] {
    let start = Instant::now();
    let stats = pass(&mut engine, depth, file.as_raw_fd(), ddir, blocks)?;
    let secs = start.elapsed().as_secs_f64();

    println!(
      "{:>5}: {} ios, {:.1} MiB/s, {:.0} iops, {} inline, {} short, {} failed",
      format!("{ddir:?}").to_lowercase(),
      stats.ios,
      stats.bytes as f64 / (1024.0 * 1024.0) / secs,
      stats.ios as f64 / secs,
      stats.inline,
      stats.short,
      stats.failed,
    );
  }

  println!("{} engine, iodepth {depth}", engine.name());
  engine.cleanup();
  Ok(())
}
