use std::fs;

use ml_lib::{
    Dataset, Error, ErrorKind, FitConfig, MatrixView, Mlp, Model, ModelHandle,
};

fn trained_mlp(classification: bool) -> Mlp {
    let x = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
    let y = [-1.0, 1.0, 1.0, -1.0];
    let data = Dataset::from_flat(&x, 4, 2, &y, 4, 1).unwrap();
    let mut mlp = Mlp::new_with_seed(&[2, 5, 3, 1], classification, 42).unwrap();
    let cfg = FitConfig {
        num_iter: 400,
        learning_rate: 0.05,
        ..FitConfig::default()
    };
    mlp.fit(&data, &cfg).unwrap();
    mlp
}

#[test]
fn save_then_load_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();

    for classification in [false, true] {
        let mlp = trained_mlp(classification);
        let path = dir.path().join(format!("model-{classification}.bin"));
        mlp.save(&path).unwrap();

        let loaded = Mlp::load(&path).unwrap();
        assert_eq!(loaded.layer_sizes(), vec![2, 5, 3, 1]);
        assert_eq!(loaded.is_classification(), classification);

        let x = [0.3, -0.2, 1.5, 2.0, -4.0, 0.0];
        let batch = MatrixView::new(&x, 3, 2).unwrap();
        assert_eq!(
            loaded.predict_batch(batch).unwrap(),
            mlp.predict_batch(batch).unwrap()
        );
    }
}

#[test]
fn save_overwrites_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");

    Mlp::new_with_seed(&[4, 4, 4], false, 0)
        .unwrap()
        .save(&path)
        .unwrap();
    let small = Mlp::new_with_seed(&[2, 1], true, 1).unwrap();
    small.save(&path).unwrap();

    assert_eq!(Mlp::load(&path).unwrap(), small);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Mlp::load(dir.path().join("nope.bin")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

#[test]
fn truncated_and_garbage_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let good = trained_mlp(false).to_bytes();

    let truncated = dir.path().join("truncated.bin");
    fs::write(&truncated, &good[..good.len() / 2]).unwrap();

    let garbage = dir.path().join("garbage.bin");
    fs::write(&garbage, b"definitely not a model").unwrap();

    let empty = dir.path().join("empty.bin");
    fs::write(&empty, b"").unwrap();

    for path in [truncated, garbage, empty] {
        let err = Mlp::load(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptModel(_)), "{path:?}: {err}");
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}

#[test]
fn handle_save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handle.bin");

    let mut handle = ModelHandle::new(trained_mlp(true));
    handle.save(&path).unwrap();
    let reopened = ModelHandle::load_mlp(&path).unwrap();
    assert_eq!(reopened.weights().unwrap(), handle.weights().unwrap());

    handle.release().unwrap();
    assert!(matches!(handle.save(&path), Err(Error::UseAfterRelease)));
}
