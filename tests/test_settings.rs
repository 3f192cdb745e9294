use gapfiller::core::{GapFillSession, ThresholdDirection};
use gapfiller::io::raw::{self, MaskEncoding};
use gapfiller::io::MaskPolarity;
use gapfiller::io::{DetectorModel, Settings};
use gapfiller::types::FrameRole;
use ndarray::Array2;

#[test]
fn test_settings_file_round_trip() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("settings.json");

    let mut settings = Settings {
        detector: DetectorModel::Eiger4M,
        vmax: 1500.0,
        vmax_mask: Some(ThresholdDirection::Above),
        mask_below: Some(-1.0),
        ..Settings::default()
    };
    settings.convert_units(false).expect("Unit conversion failed");
    settings.save(&path).expect("Failed to save settings");

    let loaded = Settings::load(&path).expect("Failed to load settings");
    assert_eq!(loaded, settings);
    assert!(!loaded.use_pixel);

    let (move1, _) = loaded.offsets().expect("Failed to resolve offsets");
    assert!((move1.dx - 3.0).abs() < 1e-9);
    assert!((move1.dy + 4.0).abs() < 1e-9);
}

#[test]
fn test_missing_settings_file_is_io_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let err = Settings::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, gapfiller::GapFillError::Io(_)));
}

#[test]
fn test_session_from_settings_reads_mask_and_flat_field() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let model = DetectorModel::Pilatus300KW;
    let shape = model.shape();

    // Custom detector mask: only the first row is bad
    let mut mask = Array2::from_elem(shape, true);
    mask.row_mut(0).fill(false);
    let mask_path = dir.path().join("mask.raw");
    raw::write_mask(&mask_path, &mask, MaskEncoding::InvalidIsOne).expect("Failed to write mask");

    let flat = Array2::from_elem(shape, 2.0f32);
    let flat_path = dir.path().join("flat.raw");
    raw::write_raster(&flat_path, &flat).expect("Failed to write flat field");

    let settings = Settings {
        detector: model,
        mask: mask_path.to_string_lossy().into_owned(),
        flatfield: flat_path.to_string_lossy().into_owned(),
        ..Settings::default()
    };

    let mut session = GapFillSession::from_settings(&settings).expect("Failed to build session");
    assert_eq!(session.detector_mask(), Some(&mask));

    session
        .load_exposure(&Array2::from_elem(shape, 8u16), FrameRole::Original)
        .expect("Failed to load exposure");
    let frame = session.frame(FrameRole::Original).expect("Original slot empty");
    assert_eq!(frame.raster()[[5, 5]], 4.0);
    assert_eq!(frame.invalid_pixels(), shape.1);
}

#[test]
fn test_session_from_settings_detects_valid_is_one_mask() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let model = DetectorModel::Pilatus300KW;
    let shape = model.shape();

    // Exported with 1 = usable pixel; the gap is column 7
    let mut mask = Array2::from_elem(shape, true);
    mask.column_mut(7).fill(false);
    let mask_path = dir.path().join("usable.raw");
    raw::write_mask(&mask_path, &mask, MaskEncoding::ValidIsOne).expect("Failed to write mask");

    let settings = Settings {
        detector: model,
        mask: mask_path.to_string_lossy().into_owned(),
        ..Settings::default()
    };
    let session = GapFillSession::from_settings(&settings).expect("Failed to build session");
    let detector_mask = session.detector_mask().expect("Detector mask not set");
    println!(
        "Imported mask: {} of {} pixels masked",
        detector_mask.iter().filter(|&&v| !v).count(),
        detector_mask.len()
    );
    assert_eq!(detector_mask, &mask);

    // Forcing the opposite polarity flips every pixel
    let forced = Settings {
        mask_polarity: MaskPolarity::InvalidPositive,
        ..settings
    };
    let session = GapFillSession::from_settings(&forced).expect("Failed to build session");
    assert_eq!(session.detector_mask(), Some(&mask.mapv(|v| !v)));
}

#[test]
fn test_session_from_settings_rejects_truncated_mask() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mask_path = dir.path().join("mask.raw");
    std::fs::write(&mask_path, [0u8; 16]).expect("Failed to write mask");

    let settings = Settings {
        mask: mask_path.to_string_lossy().into_owned(),
        ..Settings::default()
    };
    let err = GapFillSession::from_settings(&settings).unwrap_err();
    assert!(matches!(err, gapfiller::GapFillError::InvalidFormat(_)));
}
