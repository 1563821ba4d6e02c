pub use anyhow::*;
pub use log;
pub use ndarray::{array, s, Array, Array1, Array2, ArrayView1, ArrayView2, Axis};
pub use serde::{Deserialize, Serialize};
pub use std::ffi::OsStr;
pub use std::fs::File;
pub use std::path::{Path, PathBuf};

pub use crate::error::PlatoonError;
pub use crate::traits::*;
