use aisfeed::stats::*;
use aisfeed::Error;
use test_case::test_case;

#[test]
fn counter_boundary() {
    let mut window = TimeWindow::new(3, 10);
    for t in [0, 5, 12, 35] {
        window.add(1, t);
    }

    let snapshot = window.snapshot();
    assert_eq!(snapshot.len(), 3);
    // newest bucket covers [30,40)
    assert_eq!(snapshot[2], 1);
    // [0,10) held 2 and has rolled out of the window
    assert_eq!(snapshot.iter().sum::<u64>(), 2);
}

#[test_case(Resolution::Second, 60, 1)]
#[test_case(Resolution::Minute, 60, 60)]
#[test_case(Resolution::Hour, 24, 3600)]
#[test_case(Resolution::Day, 90, 86400)]
fn resolutions(resolution: Resolution, count: usize, duration: i64) {
    let window = resolution.window();
    assert_eq!(window.bucket_count(), count);
    assert_eq!(window.duration(), duration);
}

#[test]
fn windows_are_independent() {
    let mut fine = Resolution::Second.window();
    let mut coarse = Resolution::Minute.window();
    for t in 0..120 {
        fine.add(1, t);
        coarse.add(1, t);
    }

    assert_eq!(fine.snapshot().iter().sum::<u64>(), 60);
    assert_eq!(coarse.snapshot().iter().sum::<u64>(), 120);
}

#[test]
fn load_wrong_window_fails() {
    let blob = Resolution::Hour.window().save().unwrap();
    let mut window = Resolution::Day.window();

    assert!(matches!(
        window.load(&blob),
        Err(Error::SnapshotShape {
            expected_buckets: 90,
            buckets: 24,
            ..
        })
    ));
}
