mod common;

use anyhow::Result;
use cub_dataset::*;
use std::{collections::HashSet, fs, sync::Arc};
use tch::Kind;

fn is_usage(err: &anyhow::Error) -> bool {
    data_error(err).map(DataError::is_usage).unwrap_or(false)
}

#[test]
fn label_store_loads_mini_dataset() -> Result<()> {
    let cub = common::balanced()?;
    let store = LabelStore::open(cub.root())?;

    assert_eq!(store.num_images(), 6);
    assert_eq!(store.num_attributes(), NUM_ATTRIBUTES);
    assert_eq!(store.train_test_split(), &cub.split_flags[..]);
    assert_eq!(store.image_class_labels(), &cub.class_labels[..]);
    assert_eq!(store.image_paths()[0], "001.Bird_1/Bird_0001.png");

    let (present, certainty) = store.raw_attribute_labels();
    assert_eq!(present[[1, 29]], common::presence(2, 30));
    assert_eq!(certainty[[1, 29]], common::certainty(30));

    let attributes = store.image_attribute_labels(&CalibrationTable::soft())?;
    assert_eq!(attributes.dim(), (6, NUM_ATTRIBUTES));
    assert!(attributes.iter().all(|&score| (0.0..=1.0).contains(&score)));
    Ok(())
}

#[test]
fn cached_store_is_shared() -> Result<()> {
    let cub = common::balanced()?;
    let first = LabelStore::cached(cub.root())?;
    let second = LabelStore::cached(cub.root())?;
    assert!(Arc::ptr_eq(&first, &second));
    Ok(())
}

#[test]
fn mismatched_sources_are_fatal() -> Result<()> {
    let cub = common::balanced()?;
    let images = fs::read_to_string(cub.root().join("images.txt"))?;
    let truncated: String = images.lines().take(5).map(|line| format!("{}\n", line)).collect();
    fs::write(cub.root().join("images.txt"), truncated)?;

    let err = LabelStore::open(cub.root()).unwrap_err();
    assert!(data_error(&err).unwrap().is_integrity());
    Ok(())
}

#[test]
fn missing_label_file_is_reported() -> Result<()> {
    let cub = common::balanced()?;
    fs::remove_file(cub.root().join("image_class_labels.txt"))?;
    let err = LabelStore::open(cub.root()).unwrap_err();
    assert!(data_error(&err).unwrap().is_resource_missing());
    Ok(())
}

#[test]
fn partitions_are_disjoint_and_exhaustive() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);

    let train = Cub200AttributesToClassInit::new(Partition::Train).build(store.clone())?;
    let test = Cub200AttributesToClassInit::new(Partition::Test).build(store.clone())?;
    assert_eq!(train.len(), 3);
    assert_eq!(test.len(), 3);
    assert_eq!(train.len() + test.len(), store.num_images());

    let train_ids: HashSet<_> = train.image_ids().into_iter().collect();
    let test_ids: HashSet<_> = test.image_ids().into_iter().collect();
    assert!(train_ids.is_disjoint(&test_ids));
    let all: HashSet<_> = train_ids.union(&test_ids).copied().collect();
    assert_eq!(all, (1..=6).collect());

    assert_eq!(train.num_classes(), 3);
    assert_eq!(train.num_classes(), test.num_classes());
    Ok(())
}

#[test]
fn sparse_class_labels_bound_class_index() -> Result<()> {
    let cub = common::build(&[1, 1, 0, 0], &[1, 5, 1, 5])?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200AttributesToClassInit::new(Partition::Train).build(store)?;

    // two distinct classes, but the targets reach index 4
    assert_eq!(view.num_classes(), 2);
    assert_eq!(view.max_class_index(), Some(4));
    assert_eq!(view.class_index(1)?, 4);
    Ok(())
}

#[test]
fn class_label_beyond_class_count_fails_loading() -> Result<()> {
    let cub = common::build(&[1, 0], &[1, NUM_CLASSES + 1])?;
    let err = LabelStore::open(cub.root()).unwrap_err();
    assert!(data_error(&err).unwrap().is_integrity());
    Ok(())
}

#[test]
fn attributes_to_class_samples() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200AttributesToClassInit::new(Partition::Test).build(store)?;

    let (attributes, class) = view.get(1)?;
    assert_eq!(attributes.size(), vec![NUM_ATTRIBUTES as i64]);
    assert_eq!(attributes.kind(), Kind::Float);
    assert_eq!(class.kind(), Kind::Int64);
    // the second test image is image 5 of class 2
    assert_eq!(i64::from(&class), 1);

    // attribute 1 of image 5 is absent with certainty 2, which scores 0.25
    approx::assert_abs_diff_eq!(attributes.double_value(&[0]), 0.25, epsilon = 1e-6);

    // repeated access resolves to the same image
    let (again, _) = view.get(1)?;
    assert!(bool::from(again.eq_tensor(&attributes).all()));
    Ok(())
}

#[test]
fn image_to_attributes_samples() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);

    let view = Cub200ImageToAttributesInit::new(Partition::Train).build(store.clone())?;
    assert_eq!(view.num_attributes(), NUM_ATTRIBUTES);
    let (image, attributes) = view.get(0)?;
    assert_eq!(
        image.size(),
        vec![3, common::IMAGE_SIZE, common::IMAGE_SIZE]
    );
    assert_eq!(attributes.size(), vec![NUM_ATTRIBUTES as i64]);

    let view = Cub200ImageToAttributesInit {
        transform: Some(resize_and_normalize(16)),
        ..Cub200ImageToAttributesInit::new(Partition::Train)
    }
    .build(store)?;
    let (image, _) = view.get(2)?;
    assert_eq!(image.size(), vec![3, 16, 16]);
    assert_eq!(image.kind(), Kind::Float);
    Ok(())
}

#[test]
fn binary_calibration_in_views() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200AttributesToClassInit {
        calibration: CalibrationPolicy::Binary,
        ..Cub200AttributesToClassInit::new(Partition::Train)
    }
    .build(store)?;

    let (attributes, _) = view.get(0)?;
    let values = Vec::<f32>::from(&attributes);
    assert!(values.iter().all(|&value| value == 0.0 || value == 1.0));
    // image 1 has attribute 2 but not attribute 1
    assert_eq!(values[0], 0.0);
    assert_eq!(values[1], 1.0);
    Ok(())
}

#[test]
fn missing_image_is_resource_error() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200ImageToAttributesInit::new(Partition::Train).build(store)?;

    fs::remove_file(view.image_path(0)?)?;
    let err = view.get(0).unwrap_err();
    assert!(data_error(&err).unwrap().is_resource_missing());
    Ok(())
}

#[test]
fn empty_partition_view() -> Result<()> {
    let cub = common::build(&[1, 1, 1], &[1, 2, 3])?;
    let store = Arc::new(LabelStore::open(cub.root())?);

    let view = Cub200AttributesToClassInit::new(Partition::Test).build(store.clone())?;
    assert_eq!(view.len(), 0);
    assert!(view.is_empty());
    assert!(is_usage(&view.get(0).unwrap_err()));

    let view = Cub200ImageToAttributesInit::new(Partition::Test).build(store)?;
    assert_eq!(view.len(), 0);
    assert!(is_usage(&view.get(0).unwrap_err()));
    Ok(())
}

#[test]
fn out_of_bounds_index_is_usage_error() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200AttributesToClassInit::new(Partition::Train).build(store)?;
    assert!(is_usage(&view.get(3).unwrap_err()));
    Ok(())
}

#[test]
fn predicted_attribute_matrix_must_match() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let err = Cub200AttributesToClassInit {
        attributes: Some(ndarray::Array2::zeros((5, NUM_ATTRIBUTES))),
        ..Cub200AttributesToClassInit::new(Partition::Train)
    }
    .build(store)
    .unwrap_err();
    assert!(data_error(&err).unwrap().is_integrity());
    Ok(())
}

#[test]
fn views_serve_concurrent_readers() -> Result<()> {
    let cub = common::balanced()?;
    let store = Arc::new(LabelStore::open(cub.root())?);
    let view = Cub200ImageToAttributesInit::new(Partition::Train).build(store)?;

    let sums: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let view = &view;
                scope.spawn(move || -> Result<f64> {
                    let (image, _) = view.get(worker % view.len())?;
                    Ok(image.to_kind(Kind::Float).sum(Kind::Float).double_value(&[]))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Result<_>>()
    })?;

    assert_eq!(sums[0], sums[3]);
    Ok(())
}
