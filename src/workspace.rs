use crate::error::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

pub const TRAIN_FILE: &str = "train.svm";
pub const MODEL_FILE: &str = "train.model";
pub const EVALUATE_TRAIN_FILE: &str = "evaluate_train.svm";
pub const EVALUATE_MODEL_FILE: &str = "evaluate.model";
pub const EVALUATE_PREDICT_FILE: &str = "evaluate_predict.svm";
pub const EVALUATE_RESULT_FILE: &str = "evaluate.result";

/// Temporary root holding one directory per worker slot (`<root>/<slot>/`).
/// Files inside a slot are overwritten by every evaluation running there.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    slots: usize,
}

impl Workspace {
    pub fn new<P: AsRef<Path>>(root: P, slots: usize) -> Workspace {
        Workspace {
            root: root.as_ref().to_path_buf(),
            slots,
        }
    }

    /// Creates the root and every slot directory
    pub fn prepare(&self) -> Result<()> {
        for slot in 0..self.slots {
            fs::create_dir_all(self.slot_dir(slot))?;
        }
        debug!("Prepared {} workspace slots under {}", self.slots, self.root.display());
        Ok(())
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn slot_dir(&self, slot: usize) -> PathBuf {
        self.root.join(slot.to_string())
    }

    pub fn file(&self, slot: usize, name: &str) -> PathBuf {
        self.slot_dir(slot).join(name)
    }
}
