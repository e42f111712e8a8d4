//! 会话管理
//!
//! 观察状态的客户端（UI、日志转发等）按会话 ID 注册，
//! 通过心跳（`touch`）保持活跃，超过空闲时长的会话被清理。

use crate::error::DriverError;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<T> {
    value: T,
    last_active: Instant,
    created_at: Instant,
}

/// 会话注册表
#[derive(Debug)]
pub struct SessionRegistry<T> {
    sessions: HashMap<u32, Entry<T>>,
    /// 从 1 开始（0 保留为无效 ID），溢出后从 1 重新开始
    next_id: u32,
    idle_timeout: Duration,
}

impl<T> SessionRegistry<T> {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            idle_timeout,
        }
    }

    fn generate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if id != 0 && !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// 注册新会话，返回会话 ID
    pub fn create(&mut self, value: T, now: Instant) -> u32 {
        let id = self.generate_id();
        self.sessions.insert(
            id,
            Entry {
                value,
                last_active: now,
                created_at: now,
            },
        );
        id
    }

    /// 心跳
    pub fn touch(&mut self, id: u32, now: Instant) -> Result<(), DriverError> {
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(DriverError::UnknownSession(id))?;
        entry.last_active = now;
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.sessions.get(&id).map(|e| &e.value)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.sessions.remove(&id).map(|e| e.value)
    }

    /// 会话存活时长
    pub fn age(&self, id: u32, now: Instant) -> Option<Duration> {
        self.sessions
            .get(&id)
            .map(|e| now.saturating_duration_since(e.created_at))
    }

    /// 清理空闲会话，返回被清理的会话
    pub fn evict_idle(&mut self, now: Instant) -> Vec<(u32, T)> {
        let expired: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_active) >= self.idle_timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id).map(|e| (id, e.value)))
            .collect()
    }

    /// 只保留 `keep` 返回 true 的会话
    pub fn retain(&mut self, mut keep: impl FnMut(u32, &mut T) -> bool) {
        self.sessions.retain(|id, e| keep(*id, &mut e.value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.sessions.iter().map(|(id, e)| (*id, &e.value))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
