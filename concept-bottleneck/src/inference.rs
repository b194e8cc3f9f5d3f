//! Checkpoint-backed prediction with per-stage model caching.

use crate::{
    common::*,
    model::Checkpoint,
    regime::{CheckpointName, Regime, Stage},
    AttributeClassifierInit, AttributesToClassModel, ImageEncoderInit, ImageToAttributesModel,
};
use percent_encoding::percent_decode_str;

/// A model that maps a batch of inputs to output logits.
pub trait Predictor
where
    Self: Send,
{
    /// Compute logits in evaluation mode without tracking gradients.
    fn logits(&self, input: &Tensor) -> Result<Tensor>;
}

impl Predictor for ImageToAttributesModel {
    fn logits(&self, input: &Tensor) -> Result<Tensor> {
        let input = input.to_device(self.device());
        let logits = tch::no_grad(|| self.forward_t(&input, false).logits);
        Ok(logits)
    }
}

impl Predictor for AttributesToClassModel {
    fn logits(&self, input: &Tensor) -> Result<Tensor> {
        let input = input.to_device(self.device());
        let logits = tch::no_grad(|| self.forward(&input));
        Ok(logits)
    }
}

/// Restores a model from a named checkpoint.
pub trait CheckpointLoader
where
    Self: Send + Sync,
{
    type Model: Predictor;

    fn load(&self, name: &CheckpointName) -> Result<Self::Model>;
}

/// Loads image-to-attributes checkpoints from a directory.
#[derive(Debug, Clone)]
pub struct ImageToAttributesLoader {
    pub dir: PathBuf,
    pub device: Device,
    pub init: ImageEncoderInit,
}

impl CheckpointLoader for ImageToAttributesLoader {
    type Model = ImageToAttributesModel;

    fn load(&self, name: &CheckpointName) -> Result<Self::Model> {
        let path = name.path_in(&self.dir);
        let mut model = ImageToAttributesModel::new(&self.init, self.device)?;
        model.load_checkpoint(&path)?;
        info!("loaded checkpoint '{}'", path.display());
        Ok(model)
    }
}

/// Loads attributes-to-class checkpoints from a directory.
#[derive(Debug, Clone)]
pub struct AttributesToClassLoader {
    pub dir: PathBuf,
    pub device: Device,
    pub init: AttributeClassifierInit,
}

impl CheckpointLoader for AttributesToClassLoader {
    type Model = AttributesToClassModel;

    fn load(&self, name: &CheckpointName) -> Result<Self::Model> {
        let path = name.path_in(&self.dir);
        let mut model = AttributesToClassModel::new(&self.init, self.device)?;
        model.load_checkpoint(&path)?;
        info!("loaded checkpoint '{}'", path.display());
        Ok(model)
    }
}

/// The content of a single-model cache.
#[derive(Debug)]
pub enum SlotState<M> {
    Empty,
    Loaded { name: CheckpointName, model: M },
}

impl<M> Default for SlotState<M> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<M> SlotState<M> {
    pub fn loaded_name(&self) -> Option<CheckpointName> {
        match self {
            Self::Empty => None,
            Self::Loaded { name, .. } => Some(*name),
        }
    }

    pub fn requires_load(&self, name: &CheckpointName) -> bool {
        self.loaded_name().as_ref() != Some(name)
    }

    /// Transition to `Loaded(name)`, calling `load` only on a miss.
    ///
    /// The state is left untouched when `load` fails.
    pub fn ensure_loaded<F>(&mut self, name: CheckpointName, load: F) -> Result<&M>
    where
        F: FnOnce(&CheckpointName) -> Result<M>,
    {
        if self.requires_load(&name) {
            let model = load(&name)?;
            *self = Self::Loaded { name, model };
        }

        match self {
            Self::Loaded { model, .. } => Ok(model),
            Self::Empty => bail!("the model slot is empty after loading '{}'", name),
        }
    }
}

/// A mutex-guarded single-model cache for one pipeline stage.
#[derive(Debug)]
pub struct ModelSlot<L>
where
    L: CheckpointLoader,
{
    stage: Stage,
    loader: L,
    state: Mutex<SlotState<L::Model>>,
}

impl<L> ModelSlot<L>
where
    L: CheckpointLoader,
{
    pub fn new(stage: Stage, loader: L) -> Self {
        Self {
            stage,
            loader,
            state: Mutex::new(SlotState::Empty),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// The checkpoint currently held by the slot.
    pub fn loaded(&self) -> Result<Option<CheckpointName>> {
        let state = self
            .state
            .lock()
            .map_err(|_| format_err!("the {} model slot is poisoned", self.stage))?;
        Ok(state.loaded_name())
    }

    /// Run `f` on the model backing `regime`, loading it first on a miss.
    ///
    /// The lock is held across loading and `f`, so concurrent callers never
    /// observe a model other than the one they asked for.
    pub fn with_model<T, F>(&self, regime: Regime, f: F) -> Result<T>
    where
        F: FnOnce(&L::Model) -> Result<T>,
    {
        let name = regime.checkpoint(self.stage);
        let mut state = self
            .state
            .lock()
            .map_err(|_| format_err!("the {} model slot is poisoned", self.stage))?;
        let model = state.ensure_loaded(name, |name| self.loader.load(name))?;
        f(model)
    }
}

/// Resolve a `file://` URI or a plain path to a filesystem path.
pub fn image_path_from_uri(uri: &str) -> Result<PathBuf> {
    match uri.split_once("://") {
        None => Ok(PathBuf::from(uri)),
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("file") => {
            let rest = rest.strip_prefix("localhost").unwrap_or(rest);
            let decoded = percent_decode_str(rest).decode_utf8().map_err(|err| {
                DataError::usage(format!("the URI '{}' is not valid UTF-8: {}", uri, err))
            })?;
            Ok(PathBuf::from(decoded.as_ref()))
        }
        Some((scheme, _)) => bail!(DataError::usage(format!(
            "unsupported URI scheme '{}' in '{}'",
            scheme, uri
        ))),
    }
}

/// Predicts attribute and class probabilities with cached checkpoints.
///
/// The two stages are cached in independent slots with separate locks.
pub struct InferenceService<IL = ImageToAttributesLoader, CL = AttributesToClassLoader>
where
    IL: CheckpointLoader,
    CL: CheckpointLoader,
{
    attribute_names: NameTable,
    class_names: NameTable,
    image_transform: Transform,
    images: ModelSlot<IL>,
    classes: ModelSlot<CL>,
}

impl<IL, CL> Debug for InferenceService<IL, CL>
where
    IL: CheckpointLoader + Debug,
    CL: CheckpointLoader + Debug,
    IL::Model: Debug,
    CL::Model: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceService")
            .field("attribute_names", &self.attribute_names.len())
            .field("class_names", &self.class_names.len())
            .field("images", &self.images)
            .field("classes", &self.classes)
            .finish()
    }
}

impl<IL, CL> InferenceService<IL, CL>
where
    IL: CheckpointLoader,
    CL: CheckpointLoader,
{
    pub fn new(
        image_loader: IL,
        class_loader: CL,
        attribute_names: NameTable,
        class_names: NameTable,
        image_transform: Transform,
    ) -> Self {
        Self {
            attribute_names,
            class_names,
            image_transform,
            images: ModelSlot::new(Stage::ImageToAttributes, image_loader),
            classes: ModelSlot::new(Stage::AttributesToClass, class_loader),
        }
    }

    pub fn attribute_names(&self) -> &NameTable {
        &self.attribute_names
    }

    pub fn class_names(&self) -> &NameTable {
        &self.class_names
    }

    pub fn image_slot(&self) -> &ModelSlot<IL> {
        &self.images
    }

    pub fn class_slot(&self) -> &ModelSlot<CL> {
        &self.classes
    }

    /// Per-attribute sigmoid probabilities of an image, keyed by attribute name.
    pub fn predict_image_to_attributes(
        &self,
        model_name: &str,
        image_uri: &str,
    ) -> Result<IndexMap<String, f32>> {
        let regime = Regime::from_model_name(model_name)?;
        let path = image_path_from_uri(image_uri)?;
        let image = cub_dataset::load_image(&path)?;
        let image = (self.image_transform)(image)?;

        let probs = self.images.with_model(regime, |model| {
            Ok(model.logits(&image.unsqueeze(0))?.sigmoid())
        })?;
        zip_probabilities(&self.attribute_names, &probs)
    }

    /// Softmax probabilities over classes, keyed by class name.
    ///
    /// `attribute_scores` must follow the attribute name order.
    pub fn predict_attributes_to_class(
        &self,
        model_name: &str,
        attribute_scores: &[f32],
    ) -> Result<IndexMap<String, f32>> {
        let regime = Regime::from_model_name(model_name)?;
        ensure!(
            attribute_scores.len() == self.attribute_names.len(),
            DataError::usage(format!(
                "expect {} attribute scores, but get {}",
                self.attribute_names.len(),
                attribute_scores.len()
            ))
        );
        let input = Tensor::of_slice(attribute_scores).unsqueeze(0);

        let probs = self.classes.with_model(regime, |model| {
            Ok(model.logits(&input)?.softmax(-1, Kind::Float))
        })?;
        zip_probabilities(&self.class_names, &probs)
    }
}

fn zip_probabilities(names: &NameTable, probs: &Tensor) -> Result<IndexMap<String, f32>> {
    let values = Vec::<f32>::from(&probs.to_device(Device::Cpu).flatten(0, -1));
    let pairs = names.zip_values(&values)?;
    Ok(pairs.into_iter().collect())
}
