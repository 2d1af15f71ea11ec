use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use croft::clock::{Clock, ManualClock};
use croft::coord::TileCoord;
use croft::events::{self, EngineEvent, EventReceiver};
use croft::protocol::{RentLoadEntry, TimeInput};
use croft::rent::RentTracker;

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn setup() -> (RentTracker, EventReceiver, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let (tx, rx) = events::channel(256);
    (RentTracker::new(clock.clone(), tx), rx, clock)
}

fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn rent_due_count(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::RentDue { .. }))
        .count()
}

fn snapshot_count(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::RentSnapshotChanged(_)))
        .count()
}

#[test]
fn due_fires_exactly_once_after_delay() {
    let (mut tracker, mut rx, clock) = setup();
    let coord = TileCoord::new(3, 4);
    let due = start_time() + Duration::milliseconds(1000);

    tracker.add_or_update(coord, due.into());
    assert_eq!(tracker.live_timer_count(), 1);
    drain(&mut rx);

    clock.advance(Duration::milliseconds(1000));
    tracker.fire_due(clock.now());

    let events = drain(&mut rx);
    assert_eq!(rent_due_count(&events), 1);
    match &events[0] {
        EngineEvent::RentDue {
            coord: c,
            due_at,
        } => {
            assert_eq!(*c, coord);
            assert_eq!(*due_at, due);
        }
        other => panic!("expected RentDue, got {other:?}"),
    }
    assert_eq!(tracker.live_timer_count(), 0);

    // nothing left to fire
    clock.advance(Duration::seconds(60));
    tracker.fire_due(clock.now());
    assert_eq!(rent_due_count(&drain(&mut rx)), 0);
}

#[test]
fn past_due_runs_check_immediately() {
    let (mut tracker, mut rx, clock) = setup();
    let coord = TileCoord::new(0, 0);
    let due = clock.now() - Duration::seconds(5);

    tracker.add_or_update(coord, due.into());

    let events = drain(&mut rx);
    assert_eq!(rent_due_count(&events), 1);
    assert_eq!(tracker.live_timer_count(), 0);
    assert_eq!(tracker.query(coord), Some(due));
}

#[test]
fn idempotent_replace_keeps_one_timer() {
    let (mut tracker, mut rx, _clock) = setup();
    let coord = TileCoord::new(2, 2);
    let due = start_time() + Duration::seconds(30);

    tracker.add_or_update(coord, due.into());
    tracker.add_or_update(coord, due.into());

    assert_eq!(tracker.live_timer_count(), 1);
    assert_eq!(snapshot_count(&drain(&mut rx)), 2);
}

#[test]
fn replace_cancels_previous_timer() {
    let (mut tracker, mut rx, clock) = setup();
    let coord = TileCoord::new(1, 5);
    let first = start_time() + Duration::seconds(10);
    let second = start_time() + Duration::seconds(600);

    tracker.add_or_update(coord, first.into());
    // rent paid before the first deadline: due date pushed out in the same
    // tick the old timer would have fired
    tracker.add_or_update(coord, second.into());
    drain(&mut rx);

    clock.advance(Duration::seconds(10));
    tracker.fire_due(clock.now());

    assert_eq!(rent_due_count(&drain(&mut rx)), 0, "stale due must stay silent");
    assert_eq!(tracker.live_timer_count(), 1);
    assert_eq!(tracker.query(coord), Some(second));
}

#[test]
fn malformed_due_date_is_recovered() {
    let (mut tracker, mut rx, _clock) = setup();
    let coord = TileCoord::new(5, 5);

    tracker.add_or_update(coord, "not-a-date".into());

    assert_eq!(tracker.query(coord), None);
    assert_eq!(tracker.live_timer_count(), 0);
    // the tile still got its snapshot broadcast
    assert_eq!(snapshot_count(&drain(&mut rx)), 1);
}

#[test]
fn load_broadcasts_once_regardless_of_size() {
    for count in [0usize, 1, 7] {
        let (mut tracker, mut rx, _clock) = setup();
        let entries: Vec<RentLoadEntry> = (0..count)
            .map(|i| RentLoadEntry {
                coord: TileCoord::new(i as i32, 0),
                due_at: (start_time() + Duration::seconds(60 + i as i64)).into(),
            })
            .collect();
        tracker.load(entries);
        let events = drain(&mut rx);
        assert_eq!(snapshot_count(&events), 1, "load of {count} entries");
        assert_eq!(tracker.live_timer_count(), count);
    }
}

#[test]
fn load_replaces_previous_state_and_timers() {
    let (mut tracker, mut rx, _clock) = setup();
    tracker.add_or_update(TileCoord::new(9, 9), (start_time() + Duration::seconds(5)).into());
    drain(&mut rx);

    tracker.load(vec![
        RentLoadEntry {
            coord: TileCoord::new(1, 0),
            due_at: (start_time() + Duration::seconds(90)).into(),
        },
        RentLoadEntry {
            coord: TileCoord::new(2, 0),
            due_at: TimeInput::Absent,
        },
        RentLoadEntry {
            coord: TileCoord::new(3, 0),
            due_at: "garbage".into(),
        },
    ]);

    assert_eq!(tracker.query(TileCoord::new(9, 9)), None);
    assert_eq!(tracker.tile_count(), 3);
    // only the parseable future due date owns a timer
    assert_eq!(tracker.live_timer_count(), 1);
    assert_eq!(tracker.query(TileCoord::new(3, 0)), None);
}

#[test]
fn remove_cancels_and_broadcasts_only_on_change() {
    let (mut tracker, mut rx, _clock) = setup();
    let coord = TileCoord::new(4, 4);
    tracker.add_or_update(coord, (start_time() + Duration::seconds(30)).into());
    drain(&mut rx);

    tracker.remove(coord);
    assert_eq!(snapshot_count(&drain(&mut rx)), 1);
    assert_eq!(tracker.live_timer_count(), 0);
    assert_eq!(tracker.query(coord), None);

    // removing a tile that is not tracked changes nothing
    tracker.remove(coord);
    assert_eq!(snapshot_count(&drain(&mut rx)), 0);
}

#[test]
fn removed_tile_timer_is_a_no_op() {
    let (mut tracker, mut rx, clock) = setup();
    let coord = TileCoord::new(7, 7);
    tracker.add_or_update(coord, (start_time() + Duration::seconds(1)).into());
    tracker.remove(coord);
    drain(&mut rx);

    clock.advance(Duration::seconds(2));
    tracker.fire_due(clock.now());
    assert_eq!(rent_due_count(&drain(&mut rx)), 0);
}

#[test]
fn shutdown_clears_everything_and_broadcasts_empty() {
    let (mut tracker, mut rx, _clock) = setup();
    tracker.add_or_update(TileCoord::new(1, 1), (start_time() + Duration::seconds(30)).into());
    tracker.add_or_update(TileCoord::new(2, 2), (start_time() + Duration::seconds(40)).into());
    drain(&mut rx);

    tracker.shutdown();

    assert_eq!(tracker.live_timer_count(), 0);
    assert_eq!(tracker.tile_count(), 0);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        EngineEvent::RentSnapshotChanged(snapshot) => assert!(snapshot.is_empty()),
        other => panic!("expected empty snapshot, got {other:?}"),
    }
}

#[test]
fn timers_never_exceed_future_due_tiles() {
    let (mut tracker, mut rx, clock) = setup();
    let future = |s: i64| TimeInput::from(start_time() + Duration::seconds(s));

    tracker.add_or_update(TileCoord::new(0, 0), future(10));
    tracker.add_or_update(TileCoord::new(0, 1), future(20));
    tracker.add_or_update(TileCoord::new(0, 0), future(30)); // replace
    tracker.add_or_update(TileCoord::new(0, 2), TimeInput::Absent); // no due date
    tracker.remove(TileCoord::new(0, 1));
    tracker.add_or_update(TileCoord::new(0, 3), "junk".into());
    drain(&mut rx);

    // tiles with a future due date: (0,0) only
    assert_eq!(tracker.live_timer_count(), 1);

    clock.advance(Duration::seconds(30));
    tracker.fire_due(clock.now());
    assert_eq!(tracker.live_timer_count(), 0);
}
