//! Conversion of (presence, certainty) annotations into attribute targets.

use crate::common::*;

/// Annotator certainty of a presence judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Certainty {
    NotVisible = 1,
    Guessing = 2,
    Probably = 3,
    Definitely = 4,
}

impl Certainty {
    pub const ALL: [Certainty; 4] = [
        Self::NotVisible,
        Self::Guessing,
        Self::Probably,
        Self::Definitely,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => Self::NotVisible,
            2 => Self::Guessing,
            3 => Self::Probably,
            4 => Self::Definitely,
            _ => return None,
        })
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    fn index(&self) -> usize {
        self.id() as usize - 1
    }
}

/// The score table indexed by certainty, one row per presence value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    /// Scores of `present = 0` for certainty 1 to 4.
    pub absent: [f32; 4],
    /// Scores of `present = 1` for certainty 1 to 4.
    pub present: [f32; 4],
    /// The certainty level that carries no information and maps to 0.5 for both rows.
    pub neutral: Option<Certainty>,
}

impl CalibrationTable {
    /// The confidence-weighted table.
    ///
    /// An invisible part scores 0.5 regardless of the presence flag. A guess
    /// moves the score a quarter towards the flag, "probably" and
    /// "definitely" saturate it.
    pub fn soft() -> Self {
        Self {
            absent: [0.5, 0.25, 0.0, 0.0],
            present: [0.5, 0.75, 1.0, 1.0],
            neutral: Some(Certainty::NotVisible),
        }
    }

    /// The strict table that ignores certainty.
    pub fn binary() -> Self {
        Self {
            absent: [0.0; 4],
            present: [1.0; 4],
            neutral: None,
        }
    }

    /// Check the bounds every table must satisfy.
    ///
    /// Absent scores lie in `[0, 0.5)` and present scores in `[0.5, 1]`,
    /// except at the neutral level where both are exactly 0.5.
    pub fn validate(&self) -> Result<()> {
        for certainty in Certainty::ALL {
            let absent = self.absent[certainty.index()];
            let present = self.present[certainty.index()];

            if Some(certainty) == self.neutral {
                ensure!(
                    absent == 0.5 && present == 0.5,
                    DataError::integrity(format!(
                        "neutral certainty {:?} must map to 0.5, but get ({}, {})",
                        certainty, absent, present
                    ))
                );
                continue;
            }

            ensure!(
                (0.0..0.5).contains(&absent),
                DataError::integrity(format!(
                    "absent score {} at certainty {:?} is not in [0, 0.5)",
                    absent, certainty
                ))
            );
            ensure!(
                (0.5..=1.0).contains(&present),
                DataError::integrity(format!(
                    "present score {} at certainty {:?} is not in [0.5, 1]",
                    present, certainty
                ))
            );
        }
        Ok(())
    }

    pub fn score(&self, present: bool, certainty: Certainty) -> f32 {
        let row = if present { &self.present } else { &self.absent };
        row[certainty.index()]
    }
}

/// The calibration policy selected by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CalibrationPolicy {
    Soft,
    Binary,
    Custom(CalibrationTable),
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self::Soft
    }
}

impl CalibrationPolicy {
    pub fn table(&self) -> Result<CalibrationTable> {
        let table = match self {
            Self::Soft => CalibrationTable::soft(),
            Self::Binary => CalibrationTable::binary(),
            Self::Custom(table) => table.clone(),
        };
        table.validate()?;
        Ok(table)
    }
}

/// Calibrate a single annotation.
pub fn calibrate_one(table: &CalibrationTable, present: u8, certainty: u8) -> Result<f32> {
    let present = match present {
        0 => false,
        1 => true,
        _ => bail!(DataError::integrity(format!(
            "presence flag must be 0 or 1, but get {}",
            present
        ))),
    };
    let certainty = Certainty::from_id(certainty).ok_or_else(|| {
        DataError::integrity(format!(
            "certainty must be in range 1..=4, but get {}",
            certainty
        ))
    })?;
    Ok(table.score(present, certainty))
}

/// Calibrate parallel arrays of presence flags and certainties.
pub fn calibrate(
    table: &CalibrationTable,
    present: ArrayView1<u8>,
    certainty: ArrayView1<u8>,
) -> Result<Array1<f32>> {
    ensure!(
        present.len() == certainty.len(),
        DataError::usage(format!(
            "presence and certainty arrays differ in length ({} vs {})",
            present.len(),
            certainty.len()
        ))
    );

    present
        .iter()
        .zip(certainty.iter())
        .map(|(&present, &certainty)| calibrate_one(table, present, certainty))
        .collect::<Result<Vec<_>>>()
        .map(Array1::from)
}

/// Calibrate a whole (image, attribute) grid.
pub fn calibrate_matrix(
    table: &CalibrationTable,
    present: ArrayView2<u8>,
    certainty: ArrayView2<u8>,
) -> Result<Array2<f32>> {
    ensure!(
        present.dim() == certainty.dim(),
        DataError::usage(format!(
            "presence and certainty matrices differ in shape ({:?} vs {:?})",
            present.dim(),
            certainty.dim()
        ))
    );

    let scores: Vec<f32> = izip!(present.iter(), certainty.iter())
        .map(|(&present, &certainty)| calibrate_one(table, present, certainty))
        .try_collect()?;
    let scores = Array2::from_shape_vec(present.dim(), scores)?;
    Ok(scores)
}
