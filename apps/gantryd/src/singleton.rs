//! 单例文件锁
//!
//! 同一台机器上只能有一个进程持有串口，用文件锁保证只有一个 gantryd 实例运行。

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct SingletonLock {
    file: File,
    path: PathBuf,
}

impl SingletonLock {
    /// 尝试获取排他锁（非阻塞），成功后写入当前 PID
    pub fn try_lock(lock_path: impl AsRef<Path>) -> io::Result<Self> {
        let path = lock_path.as_ref();

        // 拿到锁之前不能截断
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(path)?;

        if !file.try_lock_exclusive()? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("gantryd is already running (lock held on {})", path.display()),
            ));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(&file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_writes_pid_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("gantryd.lock");

        let lock = SingletonLock::try_lock(&lock_path).unwrap();
        assert_eq!(lock.path(), lock_path);
        drop(lock);

        let content = std::fs::read_to_string(&lock_path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        // 释放后可以再次获取
        let again = SingletonLock::try_lock(&lock_path).unwrap();
        drop(again);
    }
}
