//! Per-stage training and evaluation for the three regimes.

use crate::{
    common::*,
    loader::{collate, BatchSampler},
    model::Checkpoint,
    schedule::{LearningRateSchedule, LrScheduler},
    train_loop::{BestState, Evaluation, StateDict, TrainingLoop},
    AttributesToClassModel, ImageToAttributesModel, JointModel, Snapshot,
};

/// The weight of the auxiliary head loss.
const AUX_LOSS_WEIGHT: f64 = 0.4;

/// Optimization options shared by all stages.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr_schedule: LearningRateSchedule,
    pub weight_decay: f64,
    pub stop_at_accuracy: Option<f64>,
    /// The weight of the attribute loss in joint training.
    pub attribute_loss_weight: f64,
    pub seed: u64,
}

impl FitOptions {
    fn training_loop(&self) -> TrainingLoop {
        TrainingLoop {
            epochs: self.epochs,
            stop_at_accuracy: self.stop_at_accuracy,
        }
    }

    fn optimizer(&self, vs: &nn::VarStore, lr: f64) -> Result<nn::Optimizer> {
        let optimizer = nn::Adam {
            wd: self.weight_decay,
            ..Default::default()
        }
        .build(vs, lr)?;
        Ok(optimizer)
    }
}

/// The image and attribute views of one partition, walked in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct JointViews<'a> {
    pub images: &'a Cub200ImageToAttributes,
    pub classes: &'a Cub200AttributesToClass,
}

impl<'a> JointViews<'a> {
    pub fn new(
        images: &'a Cub200ImageToAttributes,
        classes: &'a Cub200AttributesToClass,
    ) -> Result<Self> {
        ensure!(
            images.partition() == classes.partition() && images.image_ids() == classes.image_ids(),
            DataError::integrity("joint views must cover the same images in the same order")
        );
        Ok(Self { images, classes })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Collate images, attribute targets and class targets.
    fn collate(&self, indices: &[usize], device: Device) -> Result<(Tensor, Tensor, Tensor)> {
        let (images, attributes) = collate(self.images, indices, device)?;
        let classes: Vec<_> = indices
            .iter()
            .map(|&index| self.classes.class_index(index))
            .try_collect()?;
        let classes = Tensor::of_slice(&classes).to_device(device);
        Ok((images, attributes, classes))
    }
}

fn attribute_loss(logits: &Tensor, targets: &Tensor) -> Tensor {
    logits.binary_cross_entropy_with_logits::<Tensor>(targets, None, None, Reduction::Mean)
}

/// The number of attribute positions where prediction and target agree at 0.5.
fn attribute_hits(logits: &Tensor, targets: &Tensor) -> f64 {
    let hits = logits
        .sigmoid()
        .ge(0.5)
        .eq_tensor(&targets.ge(0.5))
        .to_kind(Kind::Float)
        .sum(Kind::Float);
    f64::from(&hits)
}

fn class_hits(logits: &Tensor, targets: &Tensor) -> f64 {
    let (_, predicted) = logits.max_dim(1, false);
    let hits = predicted
        .eq_tensor(targets)
        .to_kind(Kind::Float)
        .sum(Kind::Float);
    f64::from(&hits)
}

fn encoder_loss(model: &ImageToAttributesModel, images: &Tensor, targets: &Tensor) -> Tensor {
    let output = model.forward_t(images, true);
    let loss = attribute_loss(&output.logits, targets);
    match output.aux_logits {
        Some(aux_logits) => loss + attribute_loss(&aux_logits, targets) * AUX_LOSS_WEIGHT,
        None => loss,
    }
}

/// Evaluate attribute loss and agreement over a view.
pub fn evaluate_image_to_attributes<V>(
    model: &ImageToAttributesModel,
    view: &V,
    batch_size: usize,
) -> Result<Evaluation>
where
    V: RandomAccessView + ?Sized,
{
    let device = model.device();
    let mut loss_sum = 0.0;
    let mut hits = 0.0;
    let mut num_targets = 0;

    for indices in BatchSampler::new(view.len(), batch_size)?.sequential() {
        let (images, targets) = collate(view, &indices, device)?;
        tch::no_grad(|| {
            let logits = model.forward_t(&images, false).logits;
            loss_sum += f64::from(&attribute_loss(&logits, &targets)) * indices.len() as f64;
            hits += attribute_hits(&logits, &targets);
        });
        num_targets += targets.numel();
    }

    Ok(average(loss_sum, view.len(), hits, num_targets))
}

/// Evaluate class loss and top-1 accuracy over a view.
pub fn evaluate_attributes_to_class<V>(
    model: &AttributesToClassModel,
    view: &V,
    batch_size: usize,
) -> Result<Evaluation>
where
    V: RandomAccessView + ?Sized,
{
    let device = model.device();
    let mut loss_sum = 0.0;
    let mut hits = 0.0;

    for indices in BatchSampler::new(view.len(), batch_size)?.sequential() {
        let (attributes, classes) = collate(view, &indices, device)?;
        tch::no_grad(|| {
            let logits = model.forward(&attributes);
            loss_sum += f64::from(&logits.cross_entropy_for_logits(&classes)) * indices.len() as f64;
            hits += class_hits(&logits, &classes);
        });
    }

    Ok(average(loss_sum, view.len(), hits, view.len()))
}

/// Evaluate the combined loss and the class accuracy of a joint model.
pub fn evaluate_joint(
    model: &JointModel,
    views: JointViews<'_>,
    batch_size: usize,
    attribute_loss_weight: f64,
) -> Result<Evaluation> {
    let device = model.encoder.device();
    let mut loss_sum = 0.0;
    let mut hits = 0.0;

    for indices in BatchSampler::new(views.len(), batch_size)?.sequential() {
        let (images, attributes, classes) = views.collate(&indices, device)?;
        tch::no_grad(|| {
            let output = model.forward_t(&images, false);
            let loss = output.class_logits.cross_entropy_for_logits(&classes)
                + attribute_loss(&output.attributes.logits, &attributes) * attribute_loss_weight;
            loss_sum += f64::from(&loss) * indices.len() as f64;
            hits += class_hits(&output.class_logits, &classes);
        });
    }

    Ok(average(loss_sum, views.len(), hits, views.len()))
}

fn average(loss_sum: f64, num_samples: usize, hits: f64, num_targets: usize) -> Evaluation {
    if num_samples == 0 || num_targets == 0 {
        return Evaluation {
            loss: 0.0,
            accuracy: 0.0,
        };
    }
    Evaluation {
        loss: loss_sum / num_samples as f64,
        accuracy: hits / num_targets as f64,
    }
}

/// Train the image-to-attributes stage and restore its best parameters.
pub fn fit_image_to_attributes<V, F>(
    model: &mut ImageToAttributesModel,
    train_view: &V,
    test_view: &V,
    options: &FitOptions,
    mut on_best: F,
) -> Result<Option<BestState<StateDict>>>
where
    V: RandomAccessView + ?Sized,
    F: FnMut(&ImageToAttributesModel, f64) -> Result<()>,
{
    let mut scheduler = LrScheduler::new(&options.lr_schedule)?;
    let mut optimizer = options.optimizer(model.var_store(), scheduler.lr())?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let device = model.device();
    let batch_size = options.batch_size;

    let best = options.training_loop().run(
        model,
        |model, view, epoch| {
            let lr = scheduler.next();
            optimizer.set_lr(lr);
            debug!("epoch {} uses lr {}", epoch + 1, lr);

            for indices in BatchSampler::new(view.len(), batch_size)?.shuffled(&mut rng) {
                let (images, targets) = collate(view, &indices, device)?;
                let loss = encoder_loss(model, &images, &targets);
                optimizer.backward_step(&loss);
            }
            Ok(())
        },
        |model, view| evaluate_image_to_attributes(model, view, batch_size),
        train_view,
        test_view,
        |model, accuracy| on_best(model, accuracy),
    )?;

    if let Some(best) = &best {
        model.restore(&best.state)?;
    }
    Ok(best)
}

/// Train the attributes-to-class stage and restore its best parameters.
pub fn fit_attributes_to_class<V, F>(
    model: &mut AttributesToClassModel,
    train_view: &V,
    test_view: &V,
    options: &FitOptions,
    mut on_best: F,
) -> Result<Option<BestState<StateDict>>>
where
    V: RandomAccessView + ?Sized,
    F: FnMut(&AttributesToClassModel, f64) -> Result<()>,
{
    let mut scheduler = LrScheduler::new(&options.lr_schedule)?;
    let mut optimizer = options.optimizer(model.var_store(), scheduler.lr())?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let device = model.device();
    let batch_size = options.batch_size;

    let best = options.training_loop().run(
        model,
        |model, view, epoch| {
            let lr = scheduler.next();
            optimizer.set_lr(lr);
            debug!("epoch {} uses lr {}", epoch + 1, lr);

            for indices in BatchSampler::new(view.len(), batch_size)?.shuffled(&mut rng) {
                let (attributes, classes) = collate(view, &indices, device)?;
                let loss = model.forward(&attributes).cross_entropy_for_logits(&classes);
                optimizer.backward_step(&loss);
            }
            Ok(())
        },
        |model, view| evaluate_attributes_to_class(model, view, batch_size),
        train_view,
        test_view,
        |model, accuracy| on_best(model, accuracy),
    )?;

    if let Some(best) = &best {
        model.restore(&best.state)?;
    }
    Ok(best)
}

/// Train both stages end-to-end and restore their best parameters.
pub fn fit_joint<F>(
    model: &mut JointModel,
    train_views: JointViews<'_>,
    test_views: JointViews<'_>,
    options: &FitOptions,
    mut on_best: F,
) -> Result<Option<BestState<(StateDict, StateDict)>>>
where
    F: FnMut(&JointModel, f64) -> Result<()>,
{
    let mut scheduler = LrScheduler::new(&options.lr_schedule)?;
    let mut encoder_optimizer = options.optimizer(model.encoder.var_store(), scheduler.lr())?;
    let mut classifier_optimizer =
        options.optimizer(model.classifier.var_store(), scheduler.lr())?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let device = model.encoder.device();
    let batch_size = options.batch_size;
    let weight = options.attribute_loss_weight;

    let best = options.training_loop().run(
        model,
        |model, views, epoch| {
            let lr = scheduler.next();
            encoder_optimizer.set_lr(lr);
            classifier_optimizer.set_lr(lr);
            debug!("epoch {} uses lr {}", epoch + 1, lr);

            for indices in BatchSampler::new(views.len(), batch_size)?.shuffled(&mut rng) {
                let (images, attributes, classes) = views.collate(&indices, device)?;
                let output = model.forward_t(&images, true);

                let mut loss = output.class_logits.cross_entropy_for_logits(&classes)
                    + attribute_loss(&output.attributes.logits, &attributes) * weight;
                if let Some(aux_logits) = &output.attributes.aux_logits {
                    loss = loss
                        + attribute_loss(aux_logits, &attributes) * (weight * AUX_LOSS_WEIGHT);
                }

                encoder_optimizer.zero_grad();
                classifier_optimizer.zero_grad();
                loss.backward();
                encoder_optimizer.step();
                classifier_optimizer.step();
            }
            Ok(())
        },
        |model, views| evaluate_joint(model, *views, batch_size, weight),
        &train_views,
        &test_views,
        |model, accuracy| on_best(model, accuracy),
    )?;

    if let Some(best) = &best {
        model.restore(&best.state)?;
    }
    Ok(best)
}

/// Predict attribute probabilities of every image covered by `views`.
///
/// Row `image_id - 1` of the output holds the sigmoid of the encoder output
/// for that image. The views must cover all `num_images` images.
pub fn predict_attribute_matrix<V>(
    model: &ImageToAttributesModel,
    views: &[&V],
    num_images: usize,
    batch_size: usize,
) -> Result<Array2<f32>>
where
    V: RandomAccessView + ?Sized,
{
    let device = model.device();
    let mut matrix: Option<Array2<f32>> = None;
    let mut covered = vec![false; num_images];

    for view in views {
        let image_ids = view.image_ids();

        for indices in BatchSampler::new(view.len(), batch_size)?.sequential() {
            let (images, _) = collate(*view, &indices, device)?;
            let probs = tch::no_grad(|| model.forward_t(&images, false).logits.sigmoid());
            let (batch, num_attributes) = probs.size2()?;
            let values = Vec::<f32>::from(&probs.to_device(Device::Cpu).flatten(0, -1));
            let probs = Array2::from_shape_vec((batch as usize, num_attributes as usize), values)?;

            let matrix = matrix.get_or_insert_with(|| {
                Array2::zeros((num_images, num_attributes as usize))
            });

            for (row, &index) in indices.iter().enumerate() {
                let image_index = image_ids[index] - 1;
                ensure!(
                    image_index < num_images,
                    DataError::integrity(format!(
                        "image id {} exceeds the number of images {}",
                        image_ids[index], num_images
                    ))
                );
                matrix.row_mut(image_index).assign(&probs.row(row));
                covered[image_index] = true;
            }
        }
    }

    ensure!(
        covered.iter().all(|&covered| covered),
        DataError::integrity("the views do not cover all images")
    );
    matrix.ok_or_else(|| DataError::integrity("no images to predict").into())
}
