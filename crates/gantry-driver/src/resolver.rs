//! 程序路径解析
//!
//! 把逻辑路径（如 `parts/bracket.jsonl`）转换为程序内容，供内核加载。

use crate::error::DriverError;
use std::path::{Component, Path, PathBuf};

pub trait PathResolver {
    /// 读取程序内容
    fn read(&self, path: &str) -> Result<String, DriverError>;
}

/// 以上传目录为根的文件系统解析
///
/// 只接受根目录下的相对路径，`..` 和绝对路径会被拒绝。
#[derive(Debug, Clone)]
pub struct FsResolver {
    root: PathBuf,
}

impl FsResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn real_path(&self, path: &str) -> Result<PathBuf, DriverError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid program path: {path:?}"),
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl PathResolver for FsResolver {
    fn read(&self, path: &str) -> Result<String, DriverError> {
        Ok(std::fs::read_to_string(self.real_path(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("parts")).unwrap();
        std::fs::write(dir.path().join("parts/a.jsonl"), "{}").unwrap();

        let resolver = FsResolver::new(dir.path());
        assert_eq!(resolver.read("parts/a.jsonl").unwrap(), "{}");
        assert!(matches!(resolver.read("parts/missing.jsonl"), Err(DriverError::Io(_))));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let resolver = FsResolver::new("/srv/upload");
        assert!(resolver.real_path("../etc/passwd").is_err());
        assert!(resolver.real_path("/etc/passwd").is_err());
        assert!(resolver.real_path("").is_err());
        assert_eq!(
            resolver.real_path("./a.nc").unwrap(),
            PathBuf::from("/srv/upload/./a.nc")
        );
    }
}
