pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use cub_dataset::{
    DataError, NameTable, RandomAccessView, Transform, Cub200AttributesToClass,
    Cub200ImageToAttributes,
};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use ndarray::Array2;
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Debug},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex},
};
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, Module as _, ModuleT as _, OptimizerConfig as _},
    Device, Kind, Reduction, Tensor,
};
