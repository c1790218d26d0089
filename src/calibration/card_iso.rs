//! Per-cardinality isotonic calibration of set scores.

use std::collections::BTreeMap;
use std::fmt;

use numr::runtime::Runtime;
use numr::tensor::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::isotonic::IsotonicRegression;
use crate::common::tensor::host_values;
use crate::error::{CbmError, CbmResult};
use crate::validation::validate_matrix;

/// Result of calibrating one feature row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    /// Calibrated probability from the regression of the row's cardinality.
    Known(f64),
    /// No regression was fit for the row's cardinality.
    UnseenCardinality,
}

impl Calibration {
    /// Calibrated value, `0.0` for an unseen cardinality.
    pub fn score(&self) -> f64 {
        match self {
            Self::Known(p) => *p,
            Self::UnseenCardinality => 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// One isotonic regression of correctness on a score column per set size.
///
/// Rows are feature vectors describing a candidate label set; column
/// `score_index` holds an uncalibrated score and column `card_index` the
/// set cardinality (truncated toward zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityIsotonicCalibrator {
    score_index: usize,
    card_index: usize,
    calibrations: BTreeMap<i64, IsotonicRegression>,
}

impl CardinalityIsotonicCalibrator {
    /// Fit on `features [n, d]` with targets `labels` (length `n`).
    pub fn fit<R: Runtime>(
        features: &Tensor<R>,
        labels: &[f64],
        score_index: usize,
        card_index: usize,
        interpolate: bool,
    ) -> CbmResult<Self> {
        let (n, d) = validate_matrix(features, "CardinalityIsotonicCalibrator::fit")?;
        if labels.len() != n {
            return Err(CbmError::DimensionMismatch {
                op: "CardinalityIsotonicCalibrator::fit",
                what: "label count",
                expected: n,
                got: labels.len(),
            });
        }
        check_index("score_index", score_index, d)?;
        check_index("card_index", card_index, d)?;

        let values = host_values(features);
        let mut groups: BTreeMap<i64, Vec<(f64, f64)>> = BTreeMap::new();
        for (row, &label) in values.chunks(d).zip(labels) {
            let card = cardinality(row[card_index])?;
            groups.entry(card).or_default().push((row[score_index], label));
        }

        let calibrations = groups
            .into_par_iter()
            .map(|(card, points)| {
                IsotonicRegression::fit(&points, interpolate).map(|iso| (card, iso))
            })
            .collect::<CbmResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            score_index,
            card_index,
            calibrations,
        })
    }

    /// Calibrate one feature row.
    pub fn calibrate_row(&self, row: &[f64]) -> CbmResult<Calibration> {
        let needed = self.score_index.max(self.card_index) + 1;
        if row.len() < needed {
            return Err(CbmError::DimensionMismatch {
                op: "CardinalityIsotonicCalibrator::calibrate_row",
                what: "row length",
                expected: needed,
                got: row.len(),
            });
        }
        let card = cardinality(row[self.card_index])?;
        Ok(match self.calibrations.get(&card) {
            Some(iso) => Calibration::Known(iso.predict(row[self.score_index])),
            None => Calibration::UnseenCardinality,
        })
    }

    /// Calibrate every row of `features [n, d]`.
    pub fn calibrate<R: Runtime>(&self, features: &Tensor<R>) -> CbmResult<Vec<Calibration>> {
        let (_, d) = validate_matrix(features, "CardinalityIsotonicCalibrator::calibrate")?;
        host_values(features)
            .chunks(d)
            .map(|row| self.calibrate_row(row))
            .collect()
    }

    /// Regression fit for cardinality `card`, if that size was seen.
    pub fn isotonic(&self, card: i64) -> Option<&IsotonicRegression> {
        self.calibrations.get(&card)
    }

    /// Seen cardinalities in increasing order.
    pub fn cardinalities(&self) -> impl Iterator<Item = i64> + '_ {
        self.calibrations.keys().copied()
    }

    pub fn score_index(&self) -> usize {
        self.score_index
    }

    pub fn card_index(&self) -> usize {
        self.card_index
    }
}

fn check_index(parameter: &'static str, index: usize, num_columns: usize) -> CbmResult<()> {
    if index >= num_columns {
        return Err(CbmError::InvalidParameter {
            parameter,
            message: format!("column {index} out of range for {num_columns} columns"),
        });
    }
    Ok(())
}

fn cardinality(value: f64) -> CbmResult<i64> {
    if !value.is_finite() {
        return Err(CbmError::InvalidParameter {
            parameter: "cardinality",
            message: format!("expected a finite set size, got {value}"),
        });
    }
    Ok(value.trunc() as i64)
}

impl fmt::Display for CardinalityIsotonicCalibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CardinalityIsotonicCalibrator {{")?;
        for (card, iso) in &self.calibrations {
            writeln!(f, "  card {card}: {iso}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    /// Columns: [score, cardinality].
    fn rows(device: &CpuDevice) -> (Tensor<CpuRuntime>, Vec<f64>) {
        #[rustfmt::skip]
        let data = [
            0.1, 1.0,
            0.4, 1.0,
            0.6, 1.0,
            0.9, 1.0,
            0.2, 2.0,
            0.8, 2.0,
        ];
        let labels = vec![0.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        (Tensor::<CpuRuntime>::from_slice(&data, &[6, 2], device), labels)
    }

    #[test]
    fn test_groups_by_cardinality() {
        let device = CpuDevice::new();
        let (x, y) = rows(&device);
        let cal = CardinalityIsotonicCalibrator::fit(&x, &y, 0, 1, false).unwrap();
        assert_eq!(cal.cardinalities().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(cal.calibrate_row(&[0.7, 1.0]).unwrap(), Calibration::Known(1.0));
        assert_eq!(cal.calibrate_row(&[0.3, 1.0]).unwrap(), Calibration::Known(0.0));
        // the size-2 violator pair pools to 0.5
        assert_eq!(cal.calibrate_row(&[0.5, 2.0]).unwrap(), Calibration::Known(0.5));
        // fractional sizes truncate
        assert_eq!(cal.calibrate_row(&[0.95, 1.7]).unwrap(), Calibration::Known(1.0));
        assert_eq!(cal.isotonic(2).map(|iso| iso.num_blocks()), Some(1));
    }

    #[test]
    fn test_unseen_cardinality_is_neutral() {
        let device = CpuDevice::new();
        let (x, y) = rows(&device);
        let cal = CardinalityIsotonicCalibrator::fit(&x, &y, 0, 1, true).unwrap();
        let c = cal.calibrate_row(&[0.5, 3.0]).unwrap();
        assert_eq!(c, Calibration::UnseenCardinality);
        assert!(!c.is_known());
        assert_eq!(c.score(), 0.0);

        let batch = Tensor::<CpuRuntime>::from_slice(&[0.9, 1.0, 0.9, 5.0], &[2, 2], &device);
        let out = cal.calibrate(&batch).unwrap();
        assert_eq!(out, vec![Calibration::Known(1.0), Calibration::UnseenCardinality]);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let device = CpuDevice::new();
        let (x, y) = rows(&device);
        assert!(matches!(
            CardinalityIsotonicCalibrator::fit(&x, &y[..3], 0, 1, false),
            Err(CbmError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            CardinalityIsotonicCalibrator::fit(&x, &y, 0, 2, false),
            Err(CbmError::InvalidParameter { parameter: "card_index", .. })
        ));
        let cal = CardinalityIsotonicCalibrator::fit(&x, &y, 0, 1, false).unwrap();
        assert!(cal.calibrate_row(&[0.5]).is_err());
    }

    #[test]
    fn test_serializes() {
        let device = CpuDevice::new();
        let (x, y) = rows(&device);
        let cal = CardinalityIsotonicCalibrator::fit(&x, &y, 0, 1, true).unwrap();
        let bytes = bincode::serialize(&cal).unwrap();
        let back: CardinalityIsotonicCalibrator = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, cal);
        assert!(cal.to_string().contains("card 2"));
    }
}
