use std::{
  io::{Read, Seek, SeekFrom, Write},
  os::fd::AsRawFd,
  pin::Pin,
};

use syslio::{
  DataDirection, EngineConfig, IoEngineOps, IoUnit, SysletEngine,
  atom::{ThreadedConfig, ThreadedFacility},
};

const BLOCK: usize = 4096;

fn engine(depth: usize, nowait: bool) -> SysletEngine<ThreadedFacility> {
  let facility =
    ThreadedFacility::new(ThreadedConfig::new().workers(2).nowait(nowait));
  SysletEngine::init(&EngineConfig::new().iodepth(depth), facility).unwrap()
}

/// Preps and queues every unit, then harvests until all have completed.
fn run_all(
  engine: &mut SysletEngine<ThreadedFacility>,
  units: &mut [Pin<Box<IoUnit>>],
) {
  for unit in units.iter_mut() {
    engine.prep(unit.as_mut());
    unsafe { engine.queue(unit.as_mut()) }.unwrap();
  }

  let mut done = 0;
  while done < units.len() {
    done += engine.getevents(units.len() - done, units.len(), None).unwrap();
  }
  assert_eq!(done, units.len());
  assert_eq!(engine.in_flight(), 0);
}

fn block_pattern(block: u64) -> Vec<u8> {
  (0..BLOCK).map(|i| (block as usize * 31 + i) as u8).collect()
}

#[test]
fn test_write_then_read_back() {
  for nowait in [false, true] {
    let file = tempfile::tempfile().unwrap();
    let fd = file.as_raw_fd();
    let mut engine = engine(8, nowait);

    let mut blocks: Vec<u64> = (0..8).collect();
    fastrand::shuffle(&mut blocks);

    let mut writes: Vec<_> = blocks
      .iter()
      .map(|&b| Box::pin(IoUnit::write(fd, block_pattern(b), b * BLOCK as u64)))
      .collect();
    run_all(&mut engine, &mut writes);
    for unit in &writes {
      assert_eq!(unit.error(), 0);
      assert_eq!(unit.resid(), 0);
    }

    let mut syncs = vec![Box::pin(IoUnit::sync(fd))];
    run_all(&mut engine, &mut syncs);
    assert_eq!(syncs[0].ddir(), DataDirection::Sync);
    assert_eq!(syncs[0].error(), 0);

    let mut reads: Vec<_> = blocks
      .iter()
      .map(|&b| Box::pin(IoUnit::read(fd, BLOCK, b * BLOCK as u64)))
      .collect();
    run_all(&mut engine, &mut reads);
    for (unit, &b) in reads.iter().zip(&blocks) {
      assert_eq!(unit.resid(), 0);
      assert_eq!(unit.transferred(), block_pattern(b).as_slice());
    }

    engine.cleanup();
  }
}

#[test]
fn test_random_offsets_land_in_file() {
  let mut file = tempfile::tempfile().unwrap();
  let fd = file.as_raw_fd();
  let mut engine = engine(4, true);

  let offsets: Vec<u64> =
    (0..4).map(|i| i * 1024 + fastrand::u64(0..512)).collect();
  let mut units: Vec<_> = offsets
    .iter()
    .map(|&off| Box::pin(IoUnit::write(fd, off.to_le_bytes().to_vec(), off)))
    .collect();
  run_all(&mut engine, &mut units);
  engine.cleanup();

  for &off in &offsets {
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(off)).unwrap();
    file.read_exact(&mut buf).unwrap();
    assert_eq!(u64::from_le_bytes(buf), off);
  }
}

#[test]
fn test_read_past_eof_is_short() {
  for nowait in [false, true] {
    let file = tempfile::tempfile().unwrap();
    file.set_len(1000).unwrap();
    let mut engine = engine(2, nowait);

    let mut units = vec![
      Box::pin(IoUnit::read(file.as_raw_fd(), BLOCK, 0)),
      Box::pin(IoUnit::read(file.as_raw_fd(), BLOCK, 8192)),
    ];
    run_all(&mut engine, &mut units);

    assert_eq!(units[0].bytes_done(), 1000);
    assert_eq!(units[0].resid(), BLOCK - 1000);
    assert_eq!(units[1].resid(), BLOCK);
    assert_eq!(units[1].error(), 0);
  }
}

#[test]
fn test_partly_cached_read_transfers_everything() {
  const LEN: usize = 16 * BLOCK;

  let mut file = tempfile::tempfile().unwrap();
  file.write_all(&vec![0x5a; 16 * LEN]).unwrap();
  file.sync_all().unwrap();
  let fd = file.as_raw_fd();
  unsafe {
    libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_DONTNEED);
    libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_RANDOM);
  }

  // Only the first page is brought back into the cache.
  let mut page = [0u8; BLOCK];
  file.seek(SeekFrom::Start(0)).unwrap();
  file.read_exact(&mut page).unwrap();

  let mut engine = engine(1, true);
  let mut units = vec![Box::pin(IoUnit::read(fd, LEN, 0))];
  run_all(&mut engine, &mut units);

  assert_eq!(units[0].error(), 0);
  assert_eq!(units[0].resid(), 0);
  assert_eq!(units[0].bytes_done(), LEN);
  assert!(units[0].transferred().iter().all(|&b| b == 0x5a));
}

#[test]
fn test_bad_descriptor_reports_ebadf() {
  for nowait in [false, true] {
    let mut engine = engine(1, nowait);
    let mut units = vec![Box::pin(IoUnit::read(-1, 16, 0))];
    run_all(&mut engine, &mut units);

    assert_eq!(units[0].error(), libc::EBADF);
    assert_eq!(units[0].resid(), 16);
    assert_eq!(
      engine.last_error().and_then(|err| err.raw_os_error()),
      Some(libc::EBADF)
    );
  }
}

#[test]
fn test_default_threaded_engine() {
  let mut engine = SysletEngine::threaded(&EngineConfig::default()).unwrap();
  assert_eq!(engine.capacity(), 32);
  assert_eq!(engine.getevents(0, 0, None).unwrap(), 0);
  engine.cleanup();
}
