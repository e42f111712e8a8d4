//! 指数退避

use std::time::Duration;

/// 重连退避：`base → 2×base → 4×base …`，封顶 `cap`
///
/// 只有在确认重连成功后才 `reset()` 回 `base`。
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base.min(cap),
        }
    }

    /// 下一次等待时长，同时把间隔翻倍
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// 不推进的当前间隔
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base.min(self.cap);
    }
}

/// 局部错误退避：`base * 2^min(errors, max_exponent)`
pub fn local_error_delay(base: Duration, errors: u32, max_exponent: u32) -> Duration {
    base.saturating_mul(1u32 << errors.min(max_exponent).min(31))
}
