//! Binary model format.
//!
//! Layout (bincode): header `{ magic "CBMX", version, K, L, F }`, the gating
//! learner, then the `K * L` cells row-major. Logistic learners are stored as
//! plain vectors and boosted ones as their tree lists, so the format does not
//! depend on tensor internals. Decoded parts go through the same checks as
//! freshly built ones.

use std::io::{Read, Write};

use numr::runtime::Runtime;
use serde::{Deserialize, Serialize};

use crate::classifier::{
    BoostedClassifier, CellState, Learner, LogisticRegression, PriorProbClassifier,
};
use crate::error::{CbmError, CbmResult};
use crate::mixture::model::CbmModel;

const MAGIC: [u8; 4] = *b"CBMX";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
    num_clusters: u64,
    num_labels: u64,
    num_features: u64,
}

/// Row-major `[F, C]` weights and `[C]` bias.
#[derive(Debug, Serialize, Deserialize)]
struct ClassifierBlob {
    weights: Vec<f64>,
    bias: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
enum LearnerBlob {
    Logistic(ClassifierBlob),
    Boosted(BoostedClassifier),
}

#[derive(Debug, Serialize, Deserialize)]
enum CellBlob {
    Uninitialized,
    PriorOnly(PriorProbClassifier),
    Fitted(LearnerBlob),
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    header: Header,
    gating: LearnerBlob,
    cells: Vec<CellBlob>,
}

impl LearnerBlob {
    fn from_learner<R: Runtime>(learner: &Learner<R>) -> Self {
        match learner {
            Learner::Logistic(lr) => Self::Logistic(ClassifierBlob {
                weights: lr.weights_vec(),
                bias: lr.bias_vec(),
            }),
            Learner::Boosted(b) => Self::Boosted(b.clone()),
        }
    }

    fn into_learner<R: Runtime>(
        self,
        num_features: usize,
        device: &R::Device,
    ) -> CbmResult<Learner<R>> {
        match self {
            Self::Logistic(blob) => Ok(Learner::Logistic(LogisticRegression::from_parts(
                &blob.weights,
                &blob.bias,
                num_features,
                device,
            )?)),
            Self::Boosted(b) => {
                b.check()?;
                if b.num_features() != num_features {
                    return Err(CbmError::Format(format!(
                        "boosted learner has {} features, header says {num_features}",
                        b.num_features()
                    )));
                }
                Ok(Learner::Boosted(b))
            }
        }
    }
}

impl<R: Runtime> CbmModel<R> {
    fn to_file(&self) -> ModelFile {
        let cells = self
            .cells()
            .iter()
            .map(|cell| match cell {
                CellState::Uninitialized => CellBlob::Uninitialized,
                CellState::PriorOnly(prior) => CellBlob::PriorOnly(prior.clone()),
                CellState::Fitted(fitted) => CellBlob::Fitted(LearnerBlob::from_learner(fitted)),
            })
            .collect();
        ModelFile {
            header: Header {
                magic: MAGIC,
                version: FORMAT_VERSION,
                num_clusters: self.num_clusters() as u64,
                num_labels: self.num_labels() as u64,
                num_features: self.num_features() as u64,
            },
            gating: LearnerBlob::from_learner(self.gating()),
            cells,
        }
    }

    fn from_file(file: ModelFile, device: &R::Device) -> CbmResult<Self> {
        let header = file.header;
        if header.magic != MAGIC {
            return Err(CbmError::Format(format!(
                "bad magic {:?}, expected {:?}",
                header.magic, MAGIC
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(CbmError::Format(format!(
                "unsupported format version {}, expected {}",
                header.version, FORMAT_VERSION
            )));
        }
        let dim = |v: u64| {
            usize::try_from(v).map_err(|_| CbmError::Format(format!("dimension {v} overflows")))
        };
        let num_clusters = dim(header.num_clusters)?;
        let num_labels = dim(header.num_labels)?;
        let num_features = dim(header.num_features)?;

        let assemble = || -> CbmResult<Self> {
            let gating = file.gating.into_learner(num_features, device)?;
            let cells = file
                .cells
                .into_iter()
                .map(|blob| {
                    Ok(match blob {
                        CellBlob::Uninitialized => CellState::Uninitialized,
                        CellBlob::PriorOnly(prior) => {
                            CellState::PriorOnly(PriorProbClassifier::from_probs(prior.probs())?)
                        }
                        CellBlob::Fitted(fitted) => {
                            CellState::Fitted(fitted.into_learner(num_features, device)?)
                        }
                    })
                })
                .collect::<CbmResult<Vec<_>>>()?;
            Self::from_parts(num_clusters, num_labels, gating, cells)
        };
        assemble().map_err(|e| match e {
            CbmError::Format(_) => e,
            other => CbmError::Format(format!("inconsistent model: {other}")),
        })
    }

    /// Encode the model.
    pub fn to_bytes(&self) -> CbmResult<Vec<u8>> {
        Ok(bincode::serialize(&self.to_file())?)
    }

    /// Decode a model written by [`CbmModel::to_bytes`] onto `device`.
    pub fn from_bytes(bytes: &[u8], device: &R::Device) -> CbmResult<Self> {
        let file: ModelFile = bincode::deserialize(bytes)?;
        Self::from_file(file, device)
    }

    /// Write the model to `writer`. I/O failures are returned as [`CbmError::Io`].
    pub fn save<W: Write>(&self, mut writer: W) -> CbmResult<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a model from `reader` until end of stream.
    pub fn load<Rd: Read>(mut reader: Rd, device: &R::Device) -> CbmResult<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes, device)
    }
}
