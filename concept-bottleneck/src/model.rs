//! The model registry.
//!
//! Untrained models are built from `*Init` descriptions with fixed
//! dimensionalities. Each model owns the [nn::VarStore] holding its
//! parameters, which is what checkpoints persist.

use crate::common::*;
use cub_dataset::{NUM_ATTRIBUTES, NUM_CLASSES};

pub use classifier::*;
pub use encoder::*;
pub use joint::*;

/// A model whose parameters can be persisted to and restored from a checkpoint file.
pub trait Checkpoint {
    fn var_store(&self) -> &nn::VarStore;

    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.var_store()
            .save(path)
            .with_context(|| format!("unable to save checkpoint '{}'", path.display()))?;
        Ok(())
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        ensure!(
            path.is_file(),
            DataError::resource_missing(format!(
                "the checkpoint file '{}' does not exist",
                path.display()
            ))
        );
        self.var_store_mut()
            .load(path)
            .with_context(|| format!("unable to load checkpoint '{}'", path.display()))?;
        Ok(())
    }
}

mod encoder {
    use super::*;

    /// The image encoder architecture.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum EncoderKind {
        /// Inception v3 with its classifier replaced by an attribute head.
        InceptionV3,
        /// A stack of conv-bn-relu-pool blocks, optionally with an auxiliary
        /// head attached to the second-to-last block.
        ConvNet { channels: Vec<i64>, aux_head: bool },
    }

    /// Options to build an [ImageEncoder].
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageEncoderInit {
        pub input_channels: i64,
        pub num_attributes: i64,
        pub kind: EncoderKind,
    }

    impl Default for ImageEncoderInit {
        fn default() -> Self {
            Self {
                input_channels: 3,
                num_attributes: NUM_ATTRIBUTES as i64,
                kind: EncoderKind::InceptionV3,
            }
        }
    }

    impl ImageEncoderInit {
        pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<ImageEncoder> {
            let path = path.borrow();
            let Self {
                input_channels,
                num_attributes,
                kind,
            } = self;
            ensure!(
                num_attributes > 0,
                "the number of attributes must be positive"
            );

            let encoder = match kind {
                EncoderKind::InceptionV3 => {
                    ensure!(
                        input_channels == 3,
                        "Inception v3 only accepts 3-channel input"
                    );
                    let module = tch::vision::inception::v3(&(path / "inception"), num_attributes);
                    ImageEncoder::InceptionV3(Box::new(module))
                }
                EncoderKind::ConvNet { channels, aux_head } => {
                    ensure!(!channels.is_empty(), "at least one conv block is required");
                    ensure!(
                        !aux_head || channels.len() >= 2,
                        "the auxiliary head requires at least two conv blocks"
                    );

                    let blocks: Vec<_> = channels
                        .iter()
                        .scan(input_channels, |in_c, &out_c| {
                            let dims = (*in_c, out_c);
                            *in_c = out_c;
                            Some(dims)
                        })
                        .enumerate()
                        .map(|(index, (in_c, out_c))| {
                            let path = path / format!("block_{}", index);
                            nn::seq_t()
                                .add(nn::conv2d(
                                    &path / "conv",
                                    in_c,
                                    out_c,
                                    3,
                                    nn::ConvConfig {
                                        padding: 1,
                                        bias: false,
                                        ..Default::default()
                                    },
                                ))
                                .add(nn::batch_norm2d(&path / "bn", out_c, Default::default()))
                                .add_fn(|xs| xs.relu().max_pool2d_default(2))
                        })
                        .collect();

                    let last_channels = *channels.last().unwrap_or(&input_channels);
                    let head = nn::linear(
                        path / "head",
                        last_channels,
                        num_attributes,
                        Default::default(),
                    );
                    let aux_head = aux_head.then(|| {
                        let at = channels.len() - 2;
                        let linear = nn::linear(
                            path / "aux_head",
                            channels[at],
                            num_attributes,
                            Default::default(),
                        );
                        (at, linear)
                    });

                    ImageEncoder::ConvNet(ConvNet {
                        blocks,
                        head,
                        aux_head,
                    })
                }
            };

            Ok(encoder)
        }
    }

    /// The output of an [ImageEncoder].
    #[derive(Debug)]
    pub struct EncoderOutput {
        /// `[batch, num_attributes]` attribute logits.
        pub logits: Tensor,
        /// The auxiliary head logits, only produced in training mode.
        pub aux_logits: Option<Tensor>,
    }

    /// Maps `[batch, C, H, W]` images to attribute logits.
    #[derive(Debug)]
    pub enum ImageEncoder {
        InceptionV3(Box<dyn nn::ModuleT>),
        ConvNet(ConvNet),
    }

    impl ImageEncoder {
        pub fn forward_t(&self, images: &Tensor, train: bool) -> EncoderOutput {
            match self {
                Self::InceptionV3(module) => EncoderOutput {
                    logits: module.forward_t(images, train),
                    aux_logits: None,
                },
                Self::ConvNet(module) => module.forward_t(images, train),
            }
        }
    }

    #[derive(Debug)]
    pub struct ConvNet {
        blocks: Vec<nn::SequentialT>,
        head: nn::Linear,
        aux_head: Option<(usize, nn::Linear)>,
    }

    impl ConvNet {
        pub fn forward_t(&self, images: &Tensor, train: bool) -> EncoderOutput {
            let mut aux_logits = None;
            let mut xs = images.shallow_clone();

            for (index, block) in self.blocks.iter().enumerate() {
                xs = block.forward_t(&xs, train);

                if let Some((at, aux_head)) = &self.aux_head {
                    if train && *at == index {
                        aux_logits = Some(aux_head.forward(&global_pool(&xs)));
                    }
                }
            }

            EncoderOutput {
                logits: self.head.forward(&global_pool(&xs)),
                aux_logits,
            }
        }
    }

    fn global_pool(xs: &Tensor) -> Tensor {
        xs.adaptive_avg_pool2d(&[1, 1]).flatten(1, -1)
    }

    /// The image-to-attributes model with its parameters.
    #[derive(Debug)]
    pub struct ImageToAttributesModel {
        vs: nn::VarStore,
        encoder: ImageEncoder,
    }

    impl ImageToAttributesModel {
        pub fn new(init: &ImageEncoderInit, device: Device) -> Result<Self> {
            let vs = nn::VarStore::new(device);
            let encoder = init.clone().build(&vs.root())?;
            Ok(Self { vs, encoder })
        }

        pub fn device(&self) -> Device {
            self.vs.device()
        }

        pub fn forward_t(&self, images: &Tensor, train: bool) -> EncoderOutput {
            self.encoder.forward_t(images, train)
        }
    }

    impl Checkpoint for ImageToAttributesModel {
        fn var_store(&self) -> &nn::VarStore {
            &self.vs
        }

        fn var_store_mut(&mut self) -> &mut nn::VarStore {
            &mut self.vs
        }
    }
}

mod classifier {
    use super::*;

    /// Options to build an [AttributeClassifier].
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AttributeClassifierInit {
        pub num_attributes: i64,
        pub num_classes: i64,
        /// Widths of the hidden layers. Empty means a single linear layer.
        #[serde(default)]
        pub hidden_dims: Vec<i64>,
    }

    impl Default for AttributeClassifierInit {
        fn default() -> Self {
            Self {
                num_attributes: NUM_ATTRIBUTES as i64,
                num_classes: NUM_CLASSES as i64,
                hidden_dims: vec![],
            }
        }
    }

    impl AttributeClassifierInit {
        pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<AttributeClassifier> {
            let path = path.borrow();
            let Self {
                num_attributes,
                num_classes,
                hidden_dims,
            } = self;
            ensure!(
                num_attributes > 0 && num_classes > 0,
                "the numbers of attributes and classes must be positive"
            );
            ensure!(
                hidden_dims.iter().all(|&dim| dim > 0),
                "hidden layer widths must be positive"
            );

            let (layers, last_dim) = hidden_dims.iter().enumerate().fold(
                (nn::seq(), num_attributes),
                |(layers, in_dim), (index, &out_dim)| {
                    let layers = layers
                        .add(nn::linear(
                            path / format!("fc_{}", index),
                            in_dim,
                            out_dim,
                            Default::default(),
                        ))
                        .add_fn(|xs| xs.relu());
                    (layers, out_dim)
                },
            );
            let layers = layers.add(nn::linear(
                path / "output",
                last_dim,
                num_classes,
                Default::default(),
            ));

            Ok(AttributeClassifier { layers })
        }
    }

    /// Maps `[batch, num_attributes]` attribute scores to class logits.
    #[derive(Debug)]
    pub struct AttributeClassifier {
        layers: nn::Sequential,
    }

    impl nn::Module for AttributeClassifier {
        fn forward(&self, input: &Tensor) -> Tensor {
            self.layers.forward(input)
        }
    }

    /// The attributes-to-class model with its parameters.
    #[derive(Debug)]
    pub struct AttributesToClassModel {
        vs: nn::VarStore,
        classifier: AttributeClassifier,
    }

    impl AttributesToClassModel {
        pub fn new(init: &AttributeClassifierInit, device: Device) -> Result<Self> {
            let vs = nn::VarStore::new(device);
            let classifier = init.clone().build(&vs.root())?;
            Ok(Self { vs, classifier })
        }

        pub fn device(&self) -> Device {
            self.vs.device()
        }

        pub fn forward(&self, attributes: &Tensor) -> Tensor {
            self.classifier.forward(attributes)
        }
    }

    impl Checkpoint for AttributesToClassModel {
        fn var_store(&self) -> &nn::VarStore {
            &self.vs
        }

        fn var_store_mut(&mut self) -> &mut nn::VarStore {
            &mut self.vs
        }
    }
}

mod joint {
    use super::*;

    /// Both stages chained through the attribute sigmoid.
    #[derive(Debug)]
    pub struct JointModel {
        pub encoder: ImageToAttributesModel,
        pub classifier: AttributesToClassModel,
    }

    /// The output of a [JointModel].
    #[derive(Debug)]
    pub struct JointOutput {
        pub attributes: EncoderOutput,
        pub class_logits: Tensor,
    }

    impl JointModel {
        pub fn new(
            encoder_init: &ImageEncoderInit,
            classifier_init: &AttributeClassifierInit,
            device: Device,
        ) -> Result<Self> {
            ensure!(
                encoder_init.num_attributes == classifier_init.num_attributes,
                "the encoder outputs {} attributes but the classifier expects {}",
                encoder_init.num_attributes,
                classifier_init.num_attributes
            );
            Ok(Self {
                encoder: ImageToAttributesModel::new(encoder_init, device)?,
                classifier: AttributesToClassModel::new(classifier_init, device)?,
            })
        }

        pub fn forward_t(&self, images: &Tensor, train: bool) -> JointOutput {
            let attributes = self.encoder.forward_t(images, train);
            let class_logits = self.classifier.forward(&attributes.logits.sigmoid());
            JointOutput {
                attributes,
                class_logits,
            }
        }
    }
}
