use std::collections::BTreeMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crate::core::UploadFile;

/// tus `Upload-Metadata` header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub filename: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_file(file: &UploadFile) -> Self {
        Self {
            filename: Some(file.name.clone()),
            custom: file
                .meta
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.custom.is_empty()
    }

    pub fn to_header(&self) -> String {
        let mut parts = Vec::new();

        if let Some(filename) = &self.filename {
            parts.push(format!("filename {}", STANDARD.encode(filename)));
        }

        for (key, value) in &self.custom {
            if key == "filename" {
                continue;
            }
            parts.push(format!("{} {}", key, STANDARD.encode(value)));
        }

        parts.join(",")
    }
}
