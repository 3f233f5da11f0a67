use super::*;
use crate::seed::StaticSeeds;
use crate::template::MarkDescriptor;
use common::log_setup::init_test_logging;
use common::Buffer2;

const RADIUS: usize = 50;
const WIDTH: usize = 700;
const HEIGHT: usize = 560;

fn ranger_lattice() -> Lattice {
    Lattice::new(vec![-2, -1, 0, 1, 2], vec![-1, 0, 1, 2])
}

/// Mark centres of a 5x4 grid with 120 px pitch, moved by `shift`.
fn grid_points(shift: DVec2) -> Vec<DVec2> {
    (0..4)
        .flat_map(|j| {
            (0..5).map(move |i| {
                DVec2::new(110.0 + 120.0 * i as f64, 100.0 + 120.0 * j as f64) + shift
            })
        })
        .collect()
}

fn calibration() -> ChannelCalibration {
    ChannelCalibration::new(ranger_lattice(), WIDTH).with_marks(vec![MarkDescriptor::default(); 20])
}

/// Light frame with a dark full cross at each (integer) centre.
fn draw_frame(centers: &[DVec2]) -> Raster {
    let mark = MarkDescriptor::default().render(RADIUS);
    let mut frame = Buffer2::new_filled(WIDTH, HEIGHT, 255.0f32);
    for c in centers {
        let x0 = c.x as i64 - RADIUS as i64;
        let y0 = c.y as i64 - RADIUS as i64;
        for ty in 0..2 * RADIUS {
            for tx in 0..2 * RADIUS {
                if mark[(tx, ty)] > 0.0 {
                    frame[((x0 + tx as i64) as usize, (y0 + ty as i64) as usize)] = 0.0;
                }
            }
        }
    }
    frame
}

fn grid_transform(shift: DVec2) -> Affine {
    Affine::from_rows([120.0, 0.0, 350.0 + shift.x], [0.0, 120.0, 220.0 + shift.y])
}

fn assert_points_eq(actual: &[DVec2], expected: &[DVec2]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(a.distance(*e) < 1e-9, "point {i}: got {a}, expected {e}");
    }
}

/// Compare interior pixels, away from edges where fill values come in.
fn assert_interior_eq(actual: &Raster, expected: &Raster) {
    for y in 10..HEIGHT - 10 {
        for x in 10..WIDTH - 10 {
            let (a, e) = (actual[(x, y)], expected[(x, y)]);
            assert!((a - e).abs() < 1e-3, "pixel ({x}, {y}): got {a}, expected {e}");
        }
    }
}

fn rectifier_for(reference: &Raster, config: Config) -> Rectifier {
    let seeds = StaticSeeds(grid_points(DVec2::ZERO));
    Rectifier::new(config, &calibration(), reference, &seeds).unwrap()
}

#[test]
fn test_reference_anchor_from_seeds() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let rectifier = rectifier_for(&reference, Config::default());

    assert_eq!(rectifier.output_size(), (WIDTH, WIDTH));
    assert_eq!(rectifier.templates().len(), 20);
    assert!(
        rectifier.image1_from_lattice().max_abs_diff(&grid_transform(DVec2::ZERO)) < 1e-9,
        "image1_from_lattice = {}",
        rectifier.image1_from_lattice()
    );
    assert!(rectifier.reference_fit().rms_error < 1e-9);
}

#[test]
fn test_reference_frame_detects_its_seeds() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let rectifier = rectifier_for(&reference, Config::default());

    let frame = rectifier.rectify_frame(&reference).unwrap();
    assert_points_eq(&frame.detected, &grid_points(DVec2::ZERO));
    assert!(frame.image1_from_frame.max_abs_diff(&Affine::identity()) < 1e-9);
    assert!(frame.reference_error().1 < 1e-9);

    assert_eq!(frame.image.size(), (WIDTH, WIDTH));
    assert_interior_eq(&frame.image, &reference);
    // Below the source frame the canvas is filled.
    assert_eq!(frame.image[(350, 650)], 0.0);
}

#[test]
fn test_shifted_frame_is_registered_back() {
    let shift = DVec2::new(7.0, -4.0);
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let shifted = draw_frame(&grid_points(shift));
    let rectifier = rectifier_for(&reference, Config::default());

    let frame = rectifier.rectify_frame(&shifted).unwrap();
    assert_points_eq(&frame.detected, &grid_points(shift));
    assert!(frame.fit.transform.max_abs_diff(&grid_transform(shift)) < 1e-9);
    assert!(
        frame.image1_from_frame.max_abs_diff(&Affine::translation(-shift)) < 1e-9,
        "image1_from_frame = {}",
        frame.image1_from_frame
    );
    assert_interior_eq(&frame.image, &reference);

    let (rms, max) = frame.reference_error();
    assert!(rms < 1e-9 && max < 1e-9);
}

#[test]
fn test_full_resolution_frame_is_composed_in_one_warp() {
    let shift = DVec2::new(7.0, -4.0);
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let shifted = draw_frame(&grid_points(shift));
    let full = warp(&shifted, &Affine::scale(2.0, 2.0), Some((2 * WIDTH, 2 * HEIGHT))).unwrap();
    let rectifier = rectifier_for(&reference, Config::default());

    let frame = rectifier.rectify_frame(&full).unwrap();
    assert_points_eq(&frame.detected, &grid_points(shift));

    let expected = Affine::translation(-shift) * Affine::scale(0.5, 0.5);
    assert!(
        frame.image1_from_full.max_abs_diff(&expected) < 1e-9,
        "image1_from_full = {}",
        frame.image1_from_full
    );
    assert_interior_eq(&frame.image, &reference);
}

#[test]
fn test_detected_anchor_corrects_imprecise_seeds() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let sloppy = StaticSeeds(grid_points(DVec2::new(2.0, -3.0)));

    let from_seeds = Rectifier::new(Config::default(), &calibration(), &reference, &sloppy).unwrap();
    assert!(
        from_seeds
            .image1_from_lattice()
            .max_abs_diff(&grid_transform(DVec2::new(2.0, -3.0)))
            < 1e-9
    );

    let config = Config {
        reference_anchor: ReferenceAnchor::Detected,
        ..Default::default()
    };
    let detected = Rectifier::new(config, &calibration(), &reference, &sloppy).unwrap();
    assert!(
        detected.image1_from_lattice().max_abs_diff(&grid_transform(DVec2::ZERO)) < 1e-9,
        "image1_from_lattice = {}",
        detected.image1_from_lattice()
    );
}

#[test]
fn test_custom_output_size() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let config = Config {
        output_size: Some((300, 200)),
        ..Default::default()
    };
    let rectifier = rectifier_for(&reference, config);
    let frame = rectifier.rectify_frame(&reference).unwrap();
    assert_eq!(frame.image.size(), (300, 200));
}

#[test]
fn test_calibration_seeds_drive_setup() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let calibration = calibration().with_seeds(grid_points(DVec2::ZERO));
    let rectifier = Rectifier::new(Config::default(), &calibration, &reference, &calibration).unwrap();
    assert_points_eq(rectifier.seeds(), &grid_points(DVec2::ZERO));
}

#[test]
fn test_seed_count_mismatch_fails_setup() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let mut points = grid_points(DVec2::ZERO);
    points.pop();

    match Rectifier::new(Config::default(), &calibration(), &reference, &StaticSeeds(points)) {
        Err(RectifyError::Configuration(msg)) => {
            assert!(msg.contains("19 seed points for 20 lattice points"), "{msg}")
        }
        other => panic!("expected Configuration error, got {other:?}"),
    }
}

#[test]
fn test_mark_count_mismatch_fails_setup() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let calibration = calibration().with_marks(vec![MarkDescriptor::default(); 5]);
    let seeds = StaticSeeds(grid_points(DVec2::ZERO));
    assert!(matches!(
        Rectifier::new(Config::default(), &calibration, &reference, &seeds),
        Err(RectifyError::Configuration(_))
    ));
}

#[test]
fn test_seed_provider_error_is_propagated() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let failing = |_: &Raster, _: &Lattice| -> Result<Vec<DVec2>> {
        Err(RectifyError::Configuration("no clicks recorded".into()))
    };
    assert!(matches!(
        Rectifier::new(Config::default(), &calibration(), &reference, &failing),
        Err(RectifyError::Configuration(_))
    ));
}

#[test]
fn test_collinear_seeds_fail_setup() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    // Every seed on one horizontal line: the anchor transform is singular.
    let flat: Vec<DVec2> = grid_points(DVec2::ZERO)
        .into_iter()
        .map(|p| DVec2::new(p.x, 100.0))
        .collect();
    assert!(matches!(
        Rectifier::new(Config::default(), &calibration(), &reference, &StaticSeeds(flat)),
        Err(RectifyError::DegenerateTransform { .. })
    ));
}

#[test]
fn test_non_finite_seed_fails_setup() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let mut points = grid_points(DVec2::ZERO);
    points[3] = DVec2::new(f64::INFINITY, 10.0);

    match Rectifier::new(Config::default(), &calibration(), &reference, &StaticSeeds(points)) {
        Err(RectifyError::Configuration(msg)) => {
            assert!(msg.contains("seed point 3 is not finite"), "{msg}")
        }
        other => panic!("expected Configuration error, got {other:?}"),
    }

    let mut points = grid_points(DVec2::ZERO);
    points[0].y = f64::NAN;
    assert!(matches!(
        Rectifier::new(Config::default(), &calibration(), &reference, &StaticSeeds(points)),
        Err(RectifyError::Configuration(_))
    ));
}

#[test]
fn test_seed_far_outside_frame_sees_blank_window() {
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let mut points = grid_points(DVec2::ZERO);
    points[0] = DVec2::new(1e30, 10.0);
    let rectifier =
        Rectifier::new(Config::default(), &calibration(), &reference, &StaticSeeds(points.clone()))
            .unwrap();

    let detected = rectifier.detect_marks(&reference);
    // A blank window correlates flat, so the first cell of the search region wins.
    assert_eq!(detected[0], points[0] - DVec2::splat(20.0));
    assert_points_eq(&detected[1..], &grid_points(DVec2::ZERO)[1..]);
}

#[test]
fn test_sequence_sink_receives_every_outcome() {
    init_test_logging();
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let rectifier = rectifier_for(&reference, Config {
        max_frames_in_flight: 2,
        ..Default::default()
    });

    let source = LazyFrames::new(5, |index| {
        if index == 1 {
            Ok(Buffer2::new(0, 0, vec![]))
        } else {
            Ok(draw_frame(&grid_points(DVec2::new(0.0, index as f64))))
        }
    });

    let seen = std::sync::Mutex::new(Vec::new());
    let failed = rectifier.rectify_sequence_with(&source, |outcome| {
        let shift_ok = outcome.frame().map(|frame| {
            let expected = DVec2::new(0.0, outcome.index as f64);
            frame.detected[0].distance(grid_points(expected)[0]) < 1e-9
        });
        seen.lock().unwrap().push((outcome.index, shift_ok));
    });

    assert_eq!(failed, 1);
    let mut seen = seen.into_inner().unwrap();
    seen.sort_unstable_by_key(|&(index, _)| index);
    assert_eq!(
        seen,
        vec![
            (0, Some(true)),
            (1, None),
            (2, Some(true)),
            (3, Some(true)),
            (4, Some(true)),
        ]
    );
}

#[test]
fn test_sequence_reports_failures_per_frame() {
    init_test_logging();
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let shifted = draw_frame(&grid_points(DVec2::new(-5.0, 6.0)));
    let rectifier = rectifier_for(&reference, Config {
        max_frames_in_flight: 2,
        ..Default::default()
    });

    let frames = vec![reference.clone(), Buffer2::new(0, 0, vec![]), shifted];
    let outcomes = rectifier.rectify_sequence(&frames);

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(outcomes[0].is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(RectifyError::DegenerateTransform { .. })
    ));
    let frame = outcomes[2].frame().unwrap();
    assert_points_eq(&frame.detected, &grid_points(DVec2::new(-5.0, 6.0)));
    assert_interior_eq(&frame.image, &reference);
}

#[test]
fn test_lazy_source_load_failure_is_isolated() {
    init_test_logging();
    let reference = draw_frame(&grid_points(DVec2::ZERO));
    let rectifier = rectifier_for(&reference, Config::default());

    let source = LazyFrames::new(4, |index| {
        if index == 2 {
            Err(RectifyError::FrameLoad {
                index,
                reason: "corrupt scan".into(),
            })
        } else {
            Ok(draw_frame(&grid_points(DVec2::new(index as f64, 0.0))))
        }
    });
    let outcomes = rectifier.rectify_sequence(&source);

    let ok: Vec<bool> = outcomes.iter().map(FrameOutcome::is_ok).collect();
    assert_eq!(ok, vec![true, true, false, true]);
    match &outcomes[2].result {
        Err(RectifyError::FrameLoad { index, reason }) => {
            assert_eq!(*index, 2);
            assert_eq!(reason, "corrupt scan");
        }
        other => panic!("expected FrameLoad, got {other:?}"),
    }
    let frame = outcomes[3].frame().unwrap();
    assert_points_eq(&frame.detected, &grid_points(DVec2::new(3.0, 0.0)));
}

#[test]
fn test_slice_source_out_of_range() {
    let frames = vec![Buffer2::new_filled(2, 2, 0.0f32)];
    assert!(matches!(
        FrameSource::load(frames.as_slice(), 3),
        Err(RectifyError::FrameLoad { index: 3, .. })
    ));
    assert_eq!(FrameSource::len(&frames), 1);
    assert!(!FrameSource::is_empty(&frames));
}
