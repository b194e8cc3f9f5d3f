use anyhow::Result;
use cub_dataset::{NUM_ATTRIBUTES, NUM_CLASSES};
use std::{fmt::Write as _, fs, path::Path};
use tch::{Device, Kind, Tensor};
use tempfile::TempDir;

pub const IMAGE_SIZE: i64 = 8;

/// Six images of three classes, half of each class in each partition.
///
/// Attribute presence is a function of the class, so the class is
/// recoverable from the attribute vector.
pub struct MiniCub {
    pub dir: TempDir,
}

impl MiniCub {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn dataset_dir(&self) -> std::path::PathBuf {
        self.root().join("CUB_200_2011")
    }
}

pub const SPLIT_FLAGS: [u8; 6] = [1, 1, 1, 0, 0, 0];
pub const CLASS_LABELS: [usize; 6] = [1, 2, 3, 1, 2, 3];

pub fn presence(class: usize, attribute_id: usize) -> u8 {
    ((class + attribute_id) % 3 == 0) as u8
}

pub fn certainty(attribute_id: usize) -> u8 {
    (attribute_id % 4 + 1) as u8
}

pub fn build() -> Result<MiniCub> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("CUB_200_2011");

    let mut split = String::new();
    let mut classes = String::new();
    let mut images = String::new();
    let mut attributes = String::new();

    for (index, (&flag, &class)) in SPLIT_FLAGS.iter().zip(&CLASS_LABELS).enumerate() {
        let image_id = index + 1;
        writeln!(split, "{} {}", image_id, flag)?;
        writeln!(classes, "{} {}", image_id, class)?;

        let rel_path = format!("{:03}.Bird_{}/Bird_{:04}.png", class, class, image_id);
        writeln!(images, "{} {}", image_id, rel_path)?;

        let path = root.join("images").join(&rel_path);
        fs::create_dir_all(path.parent().unwrap())?;
        let image = Tensor::full(
            &[3, IMAGE_SIZE, IMAGE_SIZE],
            (class * 60) as i64,
            (Kind::Uint8, Device::Cpu),
        );
        tch::vision::image::save(&image, &path)?;

        for attribute_id in 1..=NUM_ATTRIBUTES {
            writeln!(
                attributes,
                "{} {} {} {} 1.5",
                image_id,
                attribute_id,
                presence(class, attribute_id),
                certainty(attribute_id)
            )?;
        }
    }

    fs::create_dir_all(root.join("attributes"))?;
    fs::write(root.join("train_test_split.txt"), split)?;
    fs::write(root.join("image_class_labels.txt"), classes)?;
    fs::write(root.join("images.txt"), images)?;
    fs::write(
        root.join("attributes").join("image_attribute_labels.txt"),
        attributes,
    )?;

    let attribute_names: String = (1..=NUM_ATTRIBUTES)
        .map(|id| format!("{} has_part::value_{}\n", id, id))
        .collect();
    fs::write(dir.path().join("attributes.txt"), attribute_names)?;

    let class_names: String = (1..=NUM_CLASSES)
        .map(|id| format!("{} {:03}.Bird_{}\n", id, id, id))
        .collect();
    fs::write(root.join("classes.txt"), class_names)?;

    Ok(MiniCub { dir })
}

/// A small configuration training every regime on the fixture.
pub fn config(cub: &MiniCub) -> Result<train::config::Config> {
    let text = format!(
        r#"{{
            dataset: {{
                dataset_dir: {dataset_dir:?},
                attribute_names_file: {attribute_names:?},
                class_names_file: {class_names:?},
                image_size: {image_size},
            }},
            model: {{ encoder: {{ type: "ConvNet", channels: [4, 8], aux_head: true }} }},
            training: {{
                device: "cpu",
                batch_size: 3,
                regimes: ["independent", "sequential", "joint"],
                image_to_attributes_epochs: 2,
                attributes_to_class_epochs: 30,
                joint_epochs: 2,
                lr_schedule: {{ type: "Constant", lr: 0.05 }},
                stop_at_accuracy: null,
                attribute_loss_weight: 0.5,
                seed: 3,
            }},
            logging: {{ dir: {logging_dir:?} }},
        }}"#,
        dataset_dir = cub.dataset_dir(),
        attribute_names = cub.root().join("attributes.txt"),
        class_names = cub.dataset_dir().join("classes.txt"),
        image_size = IMAGE_SIZE,
        logging_dir = cub.root().join("logs"),
    );
    Ok(json5::from_str(&text)?)
}
