// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use retailsense_rs::detection::{Association, MotionModel, TrackIdAllocator};
use retailsense_rs::{BBox, Detection, SortConfig, SortTracker, Tracker};

fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection::new(BBox::new(x1, y1, x2, y2), 0.9, 0)
}

fn ids(tracker: &mut dyn Tracker, dets: &[Detection]) -> Vec<u32> {
    tracker.update(dets).iter().map(|t| t.id).collect()
}

/// 一个人从左往右走, 中途被遮挡一帧, 另一个人在第3帧进入
fn walk() -> Vec<Vec<Detection>> {
    vec![
        vec![det(10.0, 10.0, 50.0, 90.0)],
        vec![det(14.0, 10.0, 54.0, 90.0)],
        vec![det(18.0, 10.0, 58.0, 90.0), det(200.0, 10.0, 240.0, 90.0)],
        vec![det(204.0, 10.0, 244.0, 90.0)],
        vec![det(24.0, 10.0, 64.0, 90.0), det(208.0, 10.0, 248.0, 90.0)],
        vec![],
        vec![],
    ]
}

#[test]
fn same_input_yields_same_ids() {
    let run = || {
        let mut tracker = SortTracker::default();
        walk()
            .iter()
            .map(|frame| ids(&mut tracker, frame))
            .collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first, run());
    assert_eq!(
        first,
        vec![
            vec![1],
            vec![1],
            vec![1, 2],
            vec![1, 2],
            vec![1, 2],
            vec![1, 2],
            vec![],
        ]
    );
}

#[test]
fn track_boxes_follow_latest_detection() {
    let mut tracker = SortTracker::default();
    tracker.update(&[det(10.0, 10.0, 50.0, 90.0)]);
    let tracks = tracker.update(&[det(13.0, 11.0, 53.0, 91.0)]);
    assert_eq!(tracks.len(), 1);
    let b = tracks[0].to_box();
    assert_eq!((b.id, b.x1, b.y1, b.x2, b.y2), (1, 13.0, 11.0, 53.0, 91.0));
}

#[test]
fn trackers_sharing_an_allocator_never_reuse_ids() {
    let ids_shared = TrackIdAllocator::new();
    let mut a = SortTracker::with_allocator(SortConfig::default(), ids_shared.clone());
    let mut b = SortTracker::with_allocator(SortConfig::default(), ids_shared.clone());

    assert_eq!(ids(&mut a, &[det(0.0, 0.0, 10.0, 10.0)]), vec![1]);
    assert_eq!(ids(&mut b, &[det(0.0, 0.0, 10.0, 10.0)]), vec![2]);
    assert_eq!(ids_shared.peek(), 3);

    ids_shared.reinitialize();
    b.reset();
    assert_eq!(ids(&mut b, &[det(0.0, 0.0, 10.0, 10.0)]), vec![1]);
}

#[test]
fn every_variant_handles_the_walk() {
    for association in [Association::Greedy, Association::Hungarian] {
        for motion in [MotionModel::None, MotionModel::Kalman] {
            let config = SortConfig {
                association,
                motion,
                ..Default::default()
            };
            let mut tracker: Box<dyn Tracker> = Box::new(SortTracker::new(config));
            let mut seen = Vec::new();
            for frame in walk() {
                seen.push(ids(tracker.as_mut(), &frame));
            }
            assert_eq!(seen[0], vec![1], "{association:?}/{motion:?}");
            assert_eq!(seen[2], vec![1, 2], "{association:?}/{motion:?}");
            assert!(seen[6].is_empty(), "{association:?}/{motion:?}");
            assert_eq!(tracker.track_count(), 0);
        }
    }
}
