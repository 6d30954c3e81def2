//! Operation options

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Remove all descendants as well
    pub recursive: bool,
    /// A missing directory is not an error
    pub force: bool,
}

impl DeleteOptions {
    pub fn recursive() -> Self {
        Self { recursive: true, force: false }
    }
}
