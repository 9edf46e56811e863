use serde::{Deserialize, Serialize};
use super::errors::RestrictionError;
use super::types::UploadFile;

/// Policy applied to every file offered to the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Restrictions {
    pub max_file_size: Option<u64>,
    pub min_file_size: Option<u64>,
    pub max_total_file_size: Option<u64>,
    pub max_number_of_files: Option<usize>,
    /// Extensions such as `.txt` or `md`, compared case-insensitively
    pub allowed_extensions: Option<Vec<String>>,
}

impl Restrictions {
    /// Check a candidate against the files already tracked.
    pub fn check<'a>(
        &self,
        name: &str,
        size: u64,
        endpoint: &str,
        existing: impl Iterator<Item = &'a UploadFile> + Clone,
    ) -> Result<(), RestrictionError> {
        let duplicate = existing
            .clone()
            .any(|file| file.name == name && file.size == size && file.meta.endpoint == endpoint);
        if duplicate {
            return Err(RestrictionError::Duplicate { name: name.to_string() });
        }

        if let Some(max) = self.max_number_of_files {
            if existing.clone().count() >= max {
                return Err(RestrictionError::TooManyFiles { max });
            }
        }

        if let Some(allowed) = &self.allowed_extensions {
            if !is_allowed_extension(name, allowed) {
                return Err(RestrictionError::TypeNotAllowed { name: name.to_string() });
            }
        }

        if let Some(max) = self.max_file_size {
            if size > max {
                return Err(RestrictionError::TooLarge { name: name.to_string(), size, max });
            }
        }

        if let Some(min) = self.min_file_size {
            if size < min {
                return Err(RestrictionError::TooSmall { name: name.to_string(), size, min });
            }
        }

        if let Some(max) = self.max_total_file_size {
            let total: u64 = existing.map(|file| file.size).sum();
            if total + size > max {
                return Err(RestrictionError::TotalSizeExceeded { name: name.to_string(), max });
            }
        }

        Ok(())
    }
}

fn is_allowed_extension(name: &str, allowed: &[String]) -> bool {
    let extension = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return false,
    };

    allowed
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(&extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::core::{FileMeta, FileSource, NewFile};

    fn tracked(name: &str, size: u64) -> UploadFile {
        let new_file = NewFile::new(
            name,
            FileSource::Memory(Bytes::new()),
            FileMeta::new("https://host/files/"),
        );
        UploadFile::new(new_file, size)
    }

    #[test]
    fn test_size_limits() {
        let restrictions = Restrictions {
            max_file_size: Some(100),
            min_file_size: Some(10),
            ..Default::default()
        };
        let none: Vec<UploadFile> = Vec::new();

        assert!(restrictions.check("ok.bin", 50, "e", none.iter()).is_ok());
        assert!(matches!(
            restrictions.check("big.bin", 101, "e", none.iter()),
            Err(RestrictionError::TooLarge { size: 101, max: 100, .. })
        ));
        assert!(matches!(
            restrictions.check("tiny.bin", 9, "e", none.iter()),
            Err(RestrictionError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_file_count_and_total() {
        let existing = vec![tracked("a.txt", 60)];
        let count = Restrictions { max_number_of_files: Some(1), ..Default::default() };
        let total = Restrictions { max_total_file_size: Some(100), ..Default::default() };

        assert_eq!(
            count.check("b.txt", 1, "e", existing.iter()),
            Err(RestrictionError::TooManyFiles { max: 1 })
        );
        assert!(total.check("b.txt", 40, "e", existing.iter()).is_ok());
        assert!(total.check("b.txt", 41, "e", existing.iter()).is_err());
    }

    #[test]
    fn test_allowed_extensions() {
        let restrictions = Restrictions {
            allowed_extensions: Some(vec![".md".to_string(), "TXT".to_string()]),
            ..Default::default()
        };
        let none: Vec<UploadFile> = Vec::new();

        assert!(restrictions.check("readme.MD", 1, "e", none.iter()).is_ok());
        assert!(restrictions.check("notes.txt", 1, "e", none.iter()).is_ok());
        assert!(restrictions.check("image.png", 1, "e", none.iter()).is_err());
        assert!(restrictions.check("Makefile", 1, "e", none.iter()).is_err());
    }

    #[test]
    fn test_duplicate_detection() {
        let existing = vec![tracked("a.txt", 3)];
        let restrictions = Restrictions::default();

        assert_eq!(
            restrictions.check("a.txt", 3, "https://host/files/", existing.iter()),
            Err(RestrictionError::Duplicate { name: "a.txt".to_string() })
        );
        assert!(restrictions.check("a.txt", 3, "https://other/", existing.iter()).is_ok());
    }
}
