//! Random-access views over a partition of the dataset.

use crate::{
    common::*,
    transform::{self, Transform},
    CalibrationPolicy, LabelStore, Partition, SplitConvention, NUM_ATTRIBUTES,
};

pub use attributes_to_class::*;
pub use image_to_attributes::*;

/// A fixed-length, index-addressable collection of (input, target) samples.
///
/// Index `i` resolves to the same image for the lifetime of the view, and
/// [get](RandomAccessView::get) only reads shared state, so a view can be
/// accessed from multiple threads concurrently.
pub trait RandomAccessView
where
    Self: Send + Sync,
{
    /// Get the number of samples in the view.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the 1-based image id of each sample, ascending.
    fn image_ids(&self) -> Vec<usize>;

    /// Get the nth sample.
    fn get(&self, index: usize) -> Result<(Tensor, Tensor)>;
}

fn check_index(index: usize, len: usize) -> Result<()> {
    ensure!(
        index < len,
        DataError::usage(format!(
            "index {} is out of bounds for a view of length {}",
            index, len
        ))
    );
    Ok(())
}

fn attribute_row(attributes: &Array2<f32>, row: usize) -> Tensor {
    let values: Vec<f32> = attributes.row(row).iter().copied().collect();
    Tensor::of_slice(&values)
}

mod image_to_attributes {
    use super::*;

    /// Options to build a [Cub200ImageToAttributes] view.
    #[derive(Clone)]
    pub struct Cub200ImageToAttributesInit {
        pub partition: Partition,
        pub convention: SplitConvention,
        pub calibration: CalibrationPolicy,
        /// Applied to the decoded `[3, H, W]` uint8 image.
        pub transform: Option<Transform>,
        /// Applied to the `[NUM_ATTRIBUTES]` float attribute vector.
        pub target_transform: Option<Transform>,
    }

    impl Cub200ImageToAttributesInit {
        pub fn new(partition: Partition) -> Self {
            Self {
                partition,
                convention: SplitConvention::default(),
                calibration: CalibrationPolicy::default(),
                transform: None,
                target_transform: None,
            }
        }

        pub fn build(self, store: Arc<LabelStore>) -> Result<Cub200ImageToAttributes> {
            let Self {
                partition,
                convention,
                calibration,
                transform,
                target_transform,
            } = self;

            let attributes = store.image_attribute_labels(&calibration.table()?)?;
            ensure!(
                attributes.ncols() == NUM_ATTRIBUTES,
                DataError::integrity(format!(
                    "expect {} attributes per image, but get {}",
                    NUM_ATTRIBUTES,
                    attributes.ncols()
                ))
            );
            ensure!(
                attributes.nrows() == store.image_paths().len(),
                DataError::integrity(format!(
                    "the number of attribute rows {} differs from the number of image paths {}",
                    attributes.nrows(),
                    store.image_paths().len()
                ))
            );

            let indices = store.partition_indices(partition, convention);
            debug!(
                "built image-to-attributes {} view with {} images",
                partition,
                indices.len()
            );

            Ok(Cub200ImageToAttributes {
                image_dir: store.image_dir(),
                store,
                partition,
                indices,
                attributes,
                transform,
                target_transform,
            })
        }
    }

    /// Images paired with their calibrated attribute vectors.
    ///
    /// Images are decoded lazily in [get](RandomAccessView::get).
    #[derive(Clone)]
    pub struct Cub200ImageToAttributes {
        store: Arc<LabelStore>,
        partition: Partition,
        image_dir: PathBuf,
        indices: Vec<usize>,
        attributes: Array2<f32>,
        transform: Option<Transform>,
        target_transform: Option<Transform>,
    }

    impl Debug for Cub200ImageToAttributes {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cub200ImageToAttributes")
                .field("partition", &self.partition)
                .field("image_dir", &self.image_dir)
                .field("len", &self.indices.len())
                .finish()
        }
    }

    impl Cub200ImageToAttributes {
        pub fn num_attributes(&self) -> usize {
            self.attributes.ncols()
        }

        pub fn partition(&self) -> Partition {
            self.partition
        }

        pub fn store(&self) -> &Arc<LabelStore> {
            &self.store
        }

        /// The absolute path of the nth image.
        pub fn image_path(&self, index: usize) -> Result<PathBuf> {
            check_index(index, self.indices.len())?;
            let row = self.indices[index];
            Ok(self.image_dir.join(&self.store.image_paths()[row]))
        }
    }

    impl RandomAccessView for Cub200ImageToAttributes {
        fn len(&self) -> usize {
            self.indices.len()
        }

        fn image_ids(&self) -> Vec<usize> {
            self.indices.iter().map(|row| row + 1).collect()
        }

        fn get(&self, index: usize) -> Result<(Tensor, Tensor)> {
            let path = self.image_path(index)?;
            let row = self.indices[index];

            let image = load_image(&path)?;
            let image = transform::apply(&self.transform, image)?;
            let target = attribute_row(&self.attributes, row);
            let target = transform::apply(&self.target_transform, target)?;

            Ok((image, target))
        }
    }

    /// Decode an image file into a `[3, H, W]` uint8 tensor.
    pub fn load_image(path: &Path) -> Result<Tensor> {
        ensure!(
            path.is_file(),
            DataError::resource_missing(format!("the image file '{}' does not exist", path.display()))
        );
        let image = vision::image::load(path).map_err(|err| {
            DataError::resource_missing(format!(
                "unable to decode image '{}': {}",
                path.display(),
                err
            ))
        })?;
        Ok(image)
    }
}

mod attributes_to_class {
    use super::*;

    /// Options to build a [Cub200AttributesToClass] view.
    #[derive(Clone)]
    pub struct Cub200AttributesToClassInit {
        pub partition: Partition,
        pub convention: SplitConvention,
        pub calibration: CalibrationPolicy,
        /// If set, replaces the calibrated ground truth with a precomputed
        /// `[num_images, NUM_ATTRIBUTES]` matrix, e.g. predicted attributes.
        pub attributes: Option<Array2<f32>>,
        /// Applied to the `[NUM_ATTRIBUTES]` float attribute vector.
        pub transform: Option<Transform>,
        /// Applied to the scalar int64 class index.
        pub target_transform: Option<Transform>,
    }

    impl Cub200AttributesToClassInit {
        pub fn new(partition: Partition) -> Self {
            Self {
                partition,
                convention: SplitConvention::default(),
                calibration: CalibrationPolicy::default(),
                attributes: None,
                transform: None,
                target_transform: None,
            }
        }

        pub fn build(self, store: Arc<LabelStore>) -> Result<Cub200AttributesToClass> {
            let Self {
                partition,
                convention,
                calibration,
                attributes,
                transform,
                target_transform,
            } = self;

            let attributes = match attributes {
                Some(attributes) => attributes,
                None => store.image_attribute_labels(&calibration.table()?)?,
            };
            let class_labels = store.image_class_labels();

            ensure!(
                attributes.ncols() == NUM_ATTRIBUTES,
                DataError::integrity(format!(
                    "expect {} attributes per image, but get {}",
                    NUM_ATTRIBUTES,
                    attributes.ncols()
                ))
            );
            ensure!(
                attributes.nrows() == class_labels.len(),
                DataError::integrity(format!(
                    "the number of attribute rows {} differs from the number of class labels {}",
                    attributes.nrows(),
                    class_labels.len()
                ))
            );

            let indices = store.partition_indices(partition, convention);
            let num_classes = indices
                .iter()
                .map(|&row| class_labels[row])
                .collect::<HashSet<_>>()
                .len();
            debug!(
                "built attributes-to-class {} view with {} images and {} classes",
                partition,
                indices.len(),
                num_classes
            );

            Ok(Cub200AttributesToClass {
                store,
                partition,
                indices,
                attributes,
                num_classes,
                transform,
                target_transform,
            })
        }
    }

    /// Attribute vectors paired with 0-indexed class labels.
    #[derive(Clone)]
    pub struct Cub200AttributesToClass {
        store: Arc<LabelStore>,
        partition: Partition,
        indices: Vec<usize>,
        attributes: Array2<f32>,
        num_classes: usize,
        transform: Option<Transform>,
        target_transform: Option<Transform>,
    }

    impl Debug for Cub200AttributesToClass {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cub200AttributesToClass")
                .field("partition", &self.partition)
                .field("len", &self.indices.len())
                .field("num_classes", &self.num_classes)
                .finish()
        }
    }

    impl Cub200AttributesToClass {
        pub fn num_attributes(&self) -> usize {
            self.attributes.ncols()
        }

        /// The number of distinct classes in the partition.
        pub fn num_classes(&self) -> usize {
            self.num_classes
        }

        pub fn partition(&self) -> Partition {
            self.partition
        }

        /// The largest 0-indexed class label in the partition.
        pub fn max_class_index(&self) -> Option<usize> {
            let class_labels = self.store.image_class_labels();
            self.indices.iter().map(|&row| class_labels[row] - 1).max()
        }

        /// The 0-indexed class label of the nth sample.
        pub fn class_index(&self, index: usize) -> Result<i64> {
            check_index(index, self.indices.len())?;
            let row = self.indices[index];
            Ok(self.store.image_class_labels()[row] as i64 - 1)
        }
    }

    impl RandomAccessView for Cub200AttributesToClass {
        fn len(&self) -> usize {
            self.indices.len()
        }

        fn image_ids(&self) -> Vec<usize> {
            self.indices.iter().map(|row| row + 1).collect()
        }

        fn get(&self, index: usize) -> Result<(Tensor, Tensor)> {
            let class_index = self.class_index(index)?;
            let row = self.indices[index];

            let input = attribute_row(&self.attributes, row);
            let input = transform::apply(&self.transform, input)?;
            let target = transform::apply(&self.target_transform, Tensor::from(class_index))?;

            Ok((input, target))
        }
    }
}
