//! Parsing and validation of the raw CUB-200-2011 label files.

use crate::{common::*, CalibrationTable, NUM_ATTRIBUTES, NUM_CLASSES};

static STORE_CACHE: Lazy<DashMap<PathBuf, Arc<LabelStore>>> = Lazy::new(DashMap::new);

/// Which flag value of `train_test_split.txt` marks a training image.
///
/// The dataset README documents `1` as training, which yields 5994 training
/// and 5794 test images on the full dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitConvention {
    TrainIsOne,
    TrainIsZero,
}

impl Default for SplitConvention {
    fn default() -> Self {
        Self::TrainIsOne
    }
}

impl SplitConvention {
    pub fn partition_of(&self, flag: u8) -> Partition {
        match (self, flag) {
            (Self::TrainIsOne, 1) | (Self::TrainIsZero, 0) => Partition::Train,
            _ => Partition::Test,
        }
    }
}

/// One of the two fixed and disjoint subsets of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Train,
    Test,
}

impl Partition {
    pub fn from_train(train: bool) -> Self {
        if train {
            Self::Train
        } else {
            Self::Test
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// A row of `attributes/image_attribute_labels.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAttributeRecord {
    pub image_id: usize,
    pub attribute_id: usize,
    pub present: u8,
    pub certainty: u8,
}

/// The parsed label files of a dataset directory.
///
/// Every per-image array is indexed by `image_id - 1`.
#[derive(Debug, Clone)]
pub struct LabelStore {
    root: PathBuf,
    split_flags: Vec<u8>,
    class_labels: Vec<usize>,
    present: Array2<u8>,
    certainty: Array2<u8>,
    image_paths: Vec<String>,
}

impl LabelStore {
    /// Load the store of the dataset directory, reusing a previously loaded
    /// store of the same directory in this process.
    pub fn cached(root: impl AsRef<Path>) -> Result<Arc<Self>> {
        let root = root.as_ref().to_owned();
        if let Some(store) = STORE_CACHE.get(&root) {
            return Ok(store.clone());
        }
        let store = Arc::new(Self::open(&root)?);
        Ok(STORE_CACHE.entry(root).or_insert(store).clone())
    }

    /// Parse and cross-validate all label files in the dataset directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        info!("loading labels from '{}'", root.display());

        let split_flags = load_train_test_split(root)?;
        let class_labels = load_image_class_labels(root)?;
        let (present, certainty) = load_image_attribute_labels(root, split_flags.len())?;
        let image_paths = load_image_paths(root)?;

        let num_images = split_flags.len();
        ensure!(
            class_labels.len() == num_images && image_paths.len() == num_images,
            DataError::integrity(format!(
                "label files disagree on the number of images: {} split flags, {} class labels, {} image paths",
                num_images,
                class_labels.len(),
                image_paths.len()
            ))
        );

        Ok(Self {
            root: root.to_owned(),
            split_flags,
            class_labels,
            present,
            certainty,
            image_paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn num_images(&self) -> usize {
        self.split_flags.len()
    }

    pub fn num_attributes(&self) -> usize {
        self.present.ncols()
    }

    /// The split flag per image.
    pub fn train_test_split(&self) -> &[u8] {
        &self.split_flags
    }

    /// The 1-indexed class label per image.
    pub fn image_class_labels(&self) -> &[usize] {
        &self.class_labels
    }

    /// The raw presence flags and certainties, one row per image.
    pub fn raw_attribute_labels(&self) -> (ArrayView2<'_, u8>, ArrayView2<'_, u8>) {
        (self.present.view(), self.certainty.view())
    }

    /// The calibrated attribute matrix of all images.
    pub fn image_attribute_labels(&self, table: &CalibrationTable) -> Result<Array2<f32>> {
        crate::calibrate_matrix(table, self.present.view(), self.certainty.view())
    }

    /// The image path relative to the `images` directory per image.
    pub fn image_paths(&self) -> &[String] {
        &self.image_paths
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// The 0-based row indices of images in the partition, ascending.
    pub fn partition_indices(&self, partition: Partition, convention: SplitConvention) -> Vec<usize> {
        self.split_flags
            .iter()
            .enumerate()
            .filter(|&(_, &flag)| convention.partition_of(flag) == partition)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Load `train_test_split.txt` as one flag per image.
pub fn load_train_test_split(root: &Path) -> Result<Vec<u8>> {
    let path = root.join("train_test_split.txt");
    parse_train_test_split(&read_label_file(&path)?)
        .with_context(|| format!("invalid split file '{}'", path.display()))
}

/// Load `image_class_labels.txt` as one 1-indexed class label per image.
pub fn load_image_class_labels(root: &Path) -> Result<Vec<usize>> {
    let path = root.join("image_class_labels.txt");
    parse_image_class_labels(&read_label_file(&path)?)
        .with_context(|| format!("invalid class label file '{}'", path.display()))
}

/// Load `attributes/image_attribute_labels.txt` as presence and certainty matrices.
pub fn load_image_attribute_labels(
    root: &Path,
    num_images: usize,
) -> Result<(Array2<u8>, Array2<u8>)> {
    let path = root.join("attributes").join("image_attribute_labels.txt");
    parse_image_attribute_labels(&read_label_file(&path)?, num_images)
        .with_context(|| format!("invalid attribute label file '{}'", path.display()))
}

/// Load `images.txt` as one relative path per image.
pub fn load_image_paths(root: &Path) -> Result<Vec<String>> {
    let path = root.join("images.txt");
    parse_image_paths(&read_label_file(&path)?)
        .with_context(|| format!("invalid image list '{}'", path.display()))
}

fn read_label_file(path: &Path) -> Result<String> {
    ensure!(
        path.is_file(),
        DataError::resource_missing(format!("the label file '{}' does not exist", path.display()))
    );
    let text = fs::read_to_string(path)?;
    Ok(text)
}

pub fn parse_train_test_split(text: &str) -> Result<Vec<u8>> {
    parse_id_table(text, |value| {
        let flag: u8 = parse_field(value)?;
        ensure!(
            flag <= 1,
            DataError::integrity(format!("split flag must be 0 or 1, but get {}", flag))
        );
        Ok(flag)
    })
}

pub fn parse_image_class_labels(text: &str) -> Result<Vec<usize>> {
    parse_id_table(text, |value| {
        let class: usize = parse_field(value)?;
        ensure!(
            (1..=NUM_CLASSES).contains(&class),
            DataError::integrity(format!(
                "class label must be in 1..={}, but get {}",
                NUM_CLASSES, class
            ))
        );
        Ok(class)
    })
}

pub fn parse_image_paths(text: &str) -> Result<Vec<String>> {
    parse_id_table(text, |value| Ok(value.to_owned()))
}

/// Parse the attribute label rows.
///
/// Rows must be grouped by image id and sorted by attribute id, with exactly
/// [NUM_ATTRIBUTES] rows per image. Columns past the certainty are ignored.
pub fn parse_image_attribute_labels(
    text: &str,
    num_images: usize,
) -> Result<(Array2<u8>, Array2<u8>)> {
    let records: Vec<RawAttributeRecord> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            parse_attribute_record(line)
                .with_context(|| format!("at line {}: '{}'", line_no + 1, line))
        })
        .try_collect()?;

    let expect = num_images * NUM_ATTRIBUTES;
    ensure!(
        records.len() == expect,
        DataError::integrity(format!(
            "expect {} attribute rows ({} images x {} attributes), but get {}",
            expect,
            num_images,
            NUM_ATTRIBUTES,
            records.len()
        ))
    );

    let mut present = Array2::zeros((num_images, NUM_ATTRIBUTES));
    let mut certainty = Array2::zeros((num_images, NUM_ATTRIBUTES));

    for (index, record) in records.iter().enumerate() {
        let image_index = index / NUM_ATTRIBUTES;
        let attribute_index = index % NUM_ATTRIBUTES;
        ensure!(
            record.image_id == image_index + 1 && record.attribute_id == attribute_index + 1,
            DataError::integrity(format!(
                "attribute row {} is out of order: expect image {} attribute {}, but get image {} attribute {}",
                index + 1,
                image_index + 1,
                attribute_index + 1,
                record.image_id,
                record.attribute_id
            ))
        );
        present[[image_index, attribute_index]] = record.present;
        certainty[[image_index, attribute_index]] = record.certainty;
    }

    Ok((present, certainty))
}

fn parse_attribute_record(line: &str) -> Result<RawAttributeRecord> {
    let mut fields = line.split_whitespace();
    let mut next = |name: &str| {
        fields
            .next()
            .ok_or_else(|| DataError::integrity(format!("missing column '{}'", name)))
    };

    let record = RawAttributeRecord {
        image_id: parse_field(next("image_id")?)?,
        attribute_id: parse_field(next("attribute_id")?)?,
        present: parse_field(next("is_present")?)?,
        certainty: parse_field(next("certainty_id")?)?,
    };

    ensure!(
        record.image_id >= 1,
        DataError::integrity("image ids start from 1")
    );
    ensure!(
        (1..=NUM_ATTRIBUTES).contains(&record.attribute_id),
        DataError::integrity(format!(
            "attribute id {} is not in range 1..={}",
            record.attribute_id, NUM_ATTRIBUTES
        ))
    );
    ensure!(
        record.present <= 1,
        DataError::integrity(format!("presence flag {} is not 0 or 1", record.present))
    );
    ensure!(
        (1..=4).contains(&record.certainty),
        DataError::integrity(format!("certainty {} is not in range 1..=4", record.certainty))
    );

    Ok(record)
}

/// Parse a two-column `image_id value` table with contiguous ids starting from 1.
pub(crate) fn parse_id_table<T, F>(text: &str, mut parse_value: F) -> Result<Vec<T>>
where
    F: FnMut(&str) -> Result<T>,
{
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .enumerate()
        .map(|(index, (line_no, line))| {
            let result = (|| -> Result<T> {
                let (id, value) = line.trim().split_once(char::is_whitespace).ok_or_else(|| {
                    DataError::integrity("expect an id column followed by a value column")
                })?;
                let id: usize = parse_field(id)?;
                ensure!(
                    id == index + 1,
                    DataError::integrity(format!(
                        "image ids must be contiguous from 1, expect {} but get {}",
                        index + 1,
                        id
                    ))
                );
                parse_value(value.trim())
            })();
            result.with_context(|| format!("at line {}: '{}'", line_no + 1, line))
        })
        .try_collect()
}

fn parse_field<T>(text: &str) -> Result<T>
where
    T: FromStr,
{
    text.parse()
        .map_err(|_| DataError::integrity(format!("unable to parse field '{}'", text)).into())
}
