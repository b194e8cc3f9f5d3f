pub use crate::error::DataError;
pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use dashmap::DashMap;
pub use indexmap::IndexSet;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
pub use once_cell::sync::Lazy;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::HashSet,
    fmt::{self, Debug},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
pub use tch::{vision, Kind, Tensor};
