// src/dag/descriptor.rs

//! Opaque plug-in descriptors attached to vertices and edges.
//!
//! The engine never interprets class names or payloads; it only forwards
//! them to workers. The one exception is [`OutputDescriptor::commit_dir`],
//! which marks an output whose data must pass the commit gate.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    pub class_name: String,
    pub payload: Vec<u8>,
}

impl ProcessorDescriptor {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    pub class_name: String,
    pub payload: Vec<u8>,
}

impl InputDescriptor {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub class_name: String,
    pub payload: Vec<u8>,
    /// Directory the committed output is published into. `None` means the
    /// output is intermediate and needs no commit.
    pub commit_dir: Option<PathBuf>,
}

impl OutputDescriptor {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            payload: Vec::new(),
            commit_dir: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_commit_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.commit_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn requires_commit(&self) -> bool {
        self.commit_dir.is_some()
    }
}
