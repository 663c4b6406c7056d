//! File naming and the mirror eligibility predicate.

use std::path::{Path, PathBuf};

/// Names (or name fragments) that make a file ineligible for
/// mirroring: metadata and log files have synchronous durability
/// requirements that defeat the mirror pipeline, so they live on the
/// primary device only.
const NON_MIRRORED_FRAGMENTS: &[&str] = &["MANIFEST", "CURRENT", ".dbtmp", "LOG", ".log", "LOCK"];

/// Builds the on-disk path for SSTable `file_number` under `dir`:
/// `{dir}/{file_number:06}.ldb`.
pub fn table_file_name(dir: impl AsRef<Path>, file_number: u64) -> PathBuf {
    dir.as_ref().join(format!("{:06}.ldb", file_number))
}

/// True iff `name` is eligible for mirroring: mirroring is enabled and
/// the name contains none of the excluded fragments.
///
/// `name` is matched against the file's name component only (not its
/// full path), since the predicate is about *what kind of file this
/// is*, not where it lives.
pub fn is_mirror_eligible(mirror_enable: bool, name: impl AsRef<Path>) -> bool {
    if !mirror_enable {
        return false;
    }
    let component = name
        .as_ref()
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    !NON_MIRRORED_FRAGMENTS
        .iter()
        .any(|fragment| component.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_file_name_is_zero_padded() {
        assert_eq!(
            table_file_name("/db", 42),
            PathBuf::from("/db/000042.ldb")
        );
    }

    #[test]
    fn mirroring_disabled_globally_excludes_everything() {
        assert!(!is_mirror_eligible(false, "000042.ldb"));
    }

    #[test]
    fn manifest_and_log_files_are_excluded() {
        assert!(!is_mirror_eligible(true, "MANIFEST-000001"));
        assert!(!is_mirror_eligible(true, "CURRENT"));
        assert!(!is_mirror_eligible(true, "000001.dbtmp"));
        assert!(!is_mirror_eligible(true, "LOG"));
        assert!(!is_mirror_eligible(true, "LOG.old.log"));
        assert!(!is_mirror_eligible(true, "LOCK"));
    }

    #[test]
    fn ordinary_sstables_are_eligible() {
        assert!(is_mirror_eligible(true, "000042.ldb"));
    }
}
