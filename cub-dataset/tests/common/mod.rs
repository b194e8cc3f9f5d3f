use anyhow::Result;
use cub_dataset::NUM_ATTRIBUTES;
use std::{fmt::Write as _, fs, path::Path};
use tch::{Kind, Tensor};
use tempfile::TempDir;

pub const IMAGE_SIZE: i64 = 8;

/// A miniature dataset in the CUB-200-2011 file layout.
pub struct MiniCub {
    pub dir: TempDir,
    pub split_flags: Vec<u8>,
    pub class_labels: Vec<usize>,
}

impl MiniCub {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn presence(image_id: usize, attribute_id: usize) -> u8 {
    ((image_id + attribute_id) % 2) as u8
}

pub fn certainty(attribute_id: usize) -> u8 {
    (attribute_id % 4 + 1) as u8
}

pub fn build(split_flags: &[u8], class_labels: &[usize]) -> Result<MiniCub> {
    assert_eq!(split_flags.len(), class_labels.len());
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    let num_images = split_flags.len();

    let mut split = String::new();
    let mut classes = String::new();
    let mut images = String::new();
    let mut attributes = String::new();

    for image_id in 1..=num_images {
        let class = class_labels[image_id - 1];
        writeln!(split, "{} {}", image_id, split_flags[image_id - 1])?;
        writeln!(classes, "{} {}", image_id, class)?;

        let rel_path = format!("{:03}.Bird_{}/Bird_{:04}.png", class, class, image_id);
        writeln!(images, "{} {}", image_id, rel_path)?;

        let path = root.join("images").join(&rel_path);
        fs::create_dir_all(path.parent().unwrap())?;
        let image = Tensor::full(
            &[3, IMAGE_SIZE, IMAGE_SIZE],
            (image_id * 10) as i64,
            (Kind::Uint8, tch::Device::Cpu),
        );
        tch::vision::image::save(&image, &path)?;

        for attribute_id in 1..=NUM_ATTRIBUTES {
            writeln!(
                attributes,
                "{} {} {} {} 2.0",
                image_id,
                attribute_id,
                presence(image_id, attribute_id),
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
    fs::write(root.join("attributes.txt"), attribute_names)?;

    let num_classes = class_labels.iter().copied().max().unwrap_or(0);
    let class_names: String = (1..=num_classes)
        .map(|id| format!("{} {:03}.Bird_{}\n", id, id, id))
        .collect();
    fs::write(root.join("classes.txt"), class_names)?;

    Ok(MiniCub {
        dir,
        split_flags: split_flags.to_vec(),
        class_labels: class_labels.to_vec(),
    })
}

/// Six images of three classes, each class present in both partitions.
pub fn balanced() -> Result<MiniCub> {
    build(&[1, 1, 1, 0, 0, 0], &[1, 2, 3, 1, 2, 3])
}
