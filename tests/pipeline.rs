use depth_extract::capture::{plan_chunks, FrameSource, RawDepthReader};
use depth_extract::config::ExtractConfig;
use depth_extract::extract::{
    extract_chunk, flip_orientations, unwrap_orientation, ChunkExtractor, FrameFeatures, FramePose,
    MassFlipClassifier, ScalarName,
};
use depth_extract::output::{DirectorySink, ResultSink};
use depth_extract::ExtractError;
use ndarray::{Array2, Array3, Axis};
use std::f64::consts::PI;
use std::io::Write;

const WIDTH: usize = 80;
const HEIGHT: usize = 64;

fn disk_chunk(frames: usize, cx: usize, cy: usize, radius: usize, value: f32) -> Array3<f32> {
    let r2 = (radius * radius) as isize;
    Array3::from_shape_fn((frames, HEIGHT, WIDTH), |(_, y, x)| {
        let dx = x as isize - cx as isize;
        let dy = y as isize - cy as isize;
        if dx * dx + dy * dy <= r2 {
            value
        } else {
            0.0
        }
    })
}

fn fill(chunk: &mut Array3<f32>, t: usize, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>, value: f32) {
    for r in rows {
        for c in cols.clone() {
            chunk[[t, r, c]] = value;
        }
    }
}

#[test]
fn synthetic_disk() {
    let chunk = disk_chunk(5, 40, 30, 10, 50.0);
    let config = ExtractConfig {
        crop_size: [41, 41],
        ..ExtractConfig::default()
    };

    let result = extract_chunk(&chunk, &config, None).unwrap();

    assert_eq!(result.len(), 5);
    for (x, y) in result
        .scalar(ScalarName::CentroidXPx)
        .iter()
        .zip(result.scalar(ScalarName::CentroidYPx))
    {
        assert!((x.unwrap() - 40.0).abs() <= 1.0);
        assert!((y.unwrap() - 30.0).abs() <= 1.0);
    }
    for height in result.scalar(ScalarName::HeightAveMm) {
        assert!((height.unwrap() - 50.0).abs() < 1.0, "{height:?}");
    }
    for median in result.scalar(ScalarName::HeightMedianMm) {
        assert_eq!(median, Some(50.0));
    }
    assert!(result.flips().is_none());
    assert!(result.likelihood_frames().is_none());
}

#[test]
fn disk_below_background() {
    // Camera looks down: the animal is closer than the floor.
    let background = Array2::from_elem((HEIGHT, WIDTH), 600.0);
    let chunk = disk_chunk(3, 40, 30, 10, 50.0).mapv(|h| 600.0 - h);
    let config = ExtractConfig {
        crop_size: [41, 41],
        ..ExtractConfig::default()
    };

    let mut extractor = ChunkExtractor::new(config).unwrap().with_background(background);
    let result = extractor.extract(&chunk).unwrap();

    for x in result.scalar(ScalarName::CentroidXPx) {
        assert!((x.unwrap() - 40.0).abs() <= 1.0);
    }
    for median in result.scalar(ScalarName::HeightMedianMm) {
        assert_eq!(median, Some(50.0));
    }
}

#[test]
fn tracking_ignores_occluder() {
    let frames = 10;
    let mut chunk = Array3::<f32>::zeros((frames, HEIGHT, WIDTH));
    for t in 0..frames {
        fill(&mut chunk, t, 28..36, 30..50, 30.0);
    }
    // Occluder overhangs the right end of the animal in two frames.
    for t in [6, 7] {
        fill(&mut chunk, t, 20..44, 45..60, 60.0);
    }
    let true_x = 39.5;

    let naive = ExtractConfig {
        crop_size: [33, 33],
        ..ExtractConfig::default()
    };
    let tracked = ExtractConfig {
        use_tracking_model: true,
        rho_mean: 0.8,
        ..naive.clone()
    };

    let naive_result = extract_chunk(&chunk, &naive, None).unwrap();
    let tracked_result = extract_chunk(&chunk, &tracked, None).unwrap();
    let naive_x = naive_result.scalar(ScalarName::CentroidXPx);
    let tracked_x = tracked_result.scalar(ScalarName::CentroidXPx);

    for t in [6, 7] {
        let naive_err = (naive_x[t].unwrap() - true_x).abs();
        let tracked_err = (tracked_x[t].unwrap() - true_x).abs();
        assert!(
            tracked_err < naive_err,
            "frame {t}: tracked {tracked_err:.2} vs naive {naive_err:.2}"
        );
    }
    assert_eq!(tracked_result.likelihood_frames().unwrap().dim(), (frames, 33, 33));
}

#[test]
fn tracking_keeps_the_floor_out_of_a_dome() {
    // Heights fall from 70 mm at the centre to 20 mm at the rim.
    let (cx, cy, radius) = (40.0, 32.0, 12.0);
    let chunk = Array3::from_shape_fn((4, HEIGHT, WIDTH), |(_, y, x)| {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        if d <= radius {
            70.0 - 50.0 * d / radius
        } else {
            0.0
        }
    });
    let plain = ExtractConfig {
        crop_size: [41, 41],
        ..ExtractConfig::default()
    };
    let tracked = ExtractConfig {
        use_tracking_model: true,
        ..plain.clone()
    };

    let plain_result = extract_chunk(&chunk, &plain, None).unwrap();
    let tracked_result = extract_chunk(&chunk, &tracked, None).unwrap();

    for (p, t) in plain_result.features().iter().zip(tracked_result.features()) {
        assert!(p.foreground_pixels > 300);
        assert_eq!(t.foreground_pixels, p.foreground_pixels);
    }
    let plain_length = plain_result.scalar(ScalarName::LengthPx);
    let tracked_length = tracked_result.scalar(ScalarName::LengthPx);
    for (p, t) in plain_length.iter().zip(&tracked_length) {
        assert!((t.unwrap() - p.unwrap()).abs() < 0.5, "{t:?} vs {p:?}");
    }
}

#[test]
fn tracking_follows_a_jump_after_a_gap() {
    let frames = 10;
    let mut chunk = Array3::<f32>::zeros((frames, HEIGHT, WIDTH));
    for t in 0..frames {
        let cx = match t {
            0..=2 => 15,
            3 | 4 => continue,
            _ => 62,
        };
        let disk = disk_chunk(1, cx, 30, 6, 40.0);
        chunk.index_axis_mut(Axis(0), t).assign(&disk.index_axis(Axis(0), 0));
    }
    let config = ExtractConfig {
        use_tracking_model: true,
        crop_size: [33, 33],
        ..ExtractConfig::default()
    };

    let result = extract_chunk(&chunk, &config, None).unwrap();
    let xs = result.scalar(ScalarName::CentroidXPx);

    for t in 0..3 {
        assert!((xs[t].unwrap() - 15.0).abs() <= 1.0, "frame {t}: {:?}", xs[t]);
    }
    assert_eq!(xs[3], None);
    assert_eq!(xs[4], None);
    for t in 5..frames {
        assert!((xs[t].unwrap() - 62.0).abs() <= 1.0, "frame {t}: {:?}", xs[t]);
    }
}

#[test]
fn temporal_window_longer_than_chunk() {
    let chunk = disk_chunk(3, 40, 30, 8, 40.0);
    let config = ExtractConfig {
        prefilter_time: Some(5),
        crop_size: [33, 33],
        ..ExtractConfig::default()
    };

    let result = extract_chunk(&chunk, &config, None).unwrap();
    assert_eq!(result.len(), 3);
    assert!(result.features().iter().all(|f| !f.is_missing()));
}

#[test]
fn every_output_has_chunk_length() {
    let frames = 7;
    let mut chunk = disk_chunk(frames, 40, 30, 8, 45.0);
    chunk.index_axis_mut(Axis(0), 3).fill(0.0);
    let config = ExtractConfig {
        use_tracking_model: true,
        flip_smoothing: 3,
        crop_size: [24, 32],
        ..ExtractConfig::default()
    };

    let mut extractor = ChunkExtractor::new(config)
        .unwrap()
        .with_flip_classifier(Box::new(MassFlipClassifier));
    let result = extractor.extract(&chunk).unwrap();

    assert_eq!(result.depth_frames().dim(), (frames, 24, 32));
    assert_eq!(result.filtered_frames().dim(), (frames, 24, 32));
    assert_eq!(result.mask_frames().dim(), (frames, 24, 32));
    assert_eq!(result.likelihood_frames().unwrap().dim(), (frames, 24, 32));
    assert_eq!(result.flips().unwrap().len(), frames);
    for (_, values) in result.scalars().iter() {
        assert_eq!(values.len(), frames);
    }
}

#[test]
fn missing_frame_propagates() {
    let mut chunk = disk_chunk(5, 40, 30, 8, 45.0);
    chunk.index_axis_mut(Axis(0), 2).fill(0.0);
    let config = ExtractConfig {
        crop_size: [24, 24],
        flip_smoothing: 3,
        ..ExtractConfig::default()
    };

    let mut extractor = ChunkExtractor::new(config)
        .unwrap()
        .with_flip_classifier(Box::new(MassFlipClassifier));
    let result = extractor.extract(&chunk).unwrap();
    let frame = result.frame(2).unwrap();

    assert!(frame.features.is_missing());
    assert!(frame.depth.iter().all(|&v| v == 0.0));
    assert!(frame.mask.iter().all(|&m| !m));
    assert_eq!(frame.flipped, Some(false));
    assert_eq!(result.scalar(ScalarName::Angle)[2], None);
    assert_eq!(result.scalar(ScalarName::HeightAveMm)[2], None);
    // Velocity needs both neighbours.
    let speed = result.scalar(ScalarName::Velocity2dPx);
    assert_eq!(speed[2], None);
    assert_eq!(speed[3], None);
    assert_eq!(speed[1], Some(0.0));
    assert_eq!(speed[4], Some(0.0));
}

#[test]
fn flipped_orientation_is_unwrapped() {
    let pose = |orientation| FrameFeatures {
        pose: Some(FramePose {
            centroid_x: 10.0,
            centroid_y: 10.0,
            orientation,
            major_axis: 20.0,
            minor_axis: 8.0,
            area: 120.0,
        }),
        foreground_pixels: 120,
    };
    let mut features = vec![pose(0.1), pose(0.1 + PI)];

    flip_orientations(&mut features, &[false, true]);
    unwrap_orientation(&mut features);

    for f in &features {
        assert!((f.orientation().unwrap() - 0.1).abs() < 1e-9);
    }
}

#[test]
fn background_shape_mismatch_is_fatal() {
    let chunk = disk_chunk(2, 40, 30, 8, 45.0);
    let mut extractor = ChunkExtractor::new(ExtractConfig::default())
        .unwrap()
        .with_background(Array2::from_elem((HEIGHT + 1, WIDTH), 600.0));

    match extractor.extract(&chunk) {
        Err(ExtractError::ShapeMismatch {
            what,
            expected,
            found,
        }) => {
            assert_eq!(what, "background");
            assert_eq!(expected, (HEIGHT, WIDTH));
            assert_eq!(found, (HEIGHT + 1, WIDTH));
        }
        other => panic!("expected shape mismatch, got {other:?}"),
    }
}

#[test]
fn invalid_config_is_rejected_before_work() {
    let config = ExtractConfig {
        min_height: 50.0,
        max_height: 20.0,
        ..ExtractConfig::default()
    };
    assert!(matches!(
        ChunkExtractor::new(config),
        Err(ExtractError::Configuration(_))
    ));
}

#[test]
fn raw_file_to_directory() {
    let frames = 12;
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("depth.dat");
    let chunk = disk_chunk(frames, 40, 30, 8, 45.0).mapv(|h| 600.0 - h);
    {
        let mut file = std::fs::File::create(&input).unwrap();
        for &v in chunk.iter() {
            file.write_all(&(v as u16).to_le_bytes()).unwrap();
        }
    }

    let config = ExtractConfig {
        crop_size: [24, 24],
        chunk_size: 5,
        chunk_overlap: 2,
        ..ExtractConfig::default()
    };
    let mut source = RawDepthReader::open(&input, WIDTH, HEIGHT).unwrap();
    assert_eq!(source.frame_count(), frames);

    let mut extractor = ChunkExtractor::new(config.clone())
        .unwrap()
        .with_background(Array2::from_elem((HEIGHT, WIDTH), 600.0));
    let out = dir.path().join("proc");
    let mut sink = DirectorySink::create(&out, config.max_height).unwrap();

    for plan in plan_chunks(source.frame_count(), config.chunk_size, config.chunk_overlap).unwrap() {
        let data = source.read_frames(plan.range.clone()).unwrap();
        let result = extractor.extract(&data).unwrap();
        sink.write_chunk(&result, plan.keep.clone()).unwrap();
    }
    sink.finish().unwrap();

    let raw = std::fs::read_to_string(out.join("scalars.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["frames"], frames);
    assert_eq!(json["scalars"]["centroid_x_px"].as_array().unwrap().len(), frames);
    let depth = std::fs::read(out.join("frames.f32")).unwrap();
    assert_eq!(depth.len(), frames * 24 * 24 * 4);
}
