//! 链路状态机
//!
//! ```text
//!            open() ok
//! Closed ──► Opening ──────────► Open
//!   ▲           │ open() err      │ 致命 IO 错误 / 存活超时
//!   │           ▼                 ▼
//!   │        Faulted ◄────────────┘
//!   │           │ 重连计时到期 → Opening
//!   └── close() ┘
//! ```
//!
//! 错误处理分两级：
//! - **暂时性错误**：错误计数加一，出错的方向（读/写）暂停
//!   `base * 2^min(k, cap)` 后恢复，连接保持；连续错误超过
//!   `max_transient_errors` 后升级为致命错误
//! - **致命错误**：释放连接，按独立的指数退避安排重连，
//!   只有重连成功后退避才回到初始值
//!
//! 对外只暴露状态变化事件（[`LinkEvent`]），不向上抛出 IO 错误。

use crate::backoff::{Backoff, local_error_delay};
use crate::error::{ErrorClass, LinkError, classify};
use crate::reset::ResetLine;
use crate::transport::{Connector, Transport};
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Faulted,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Closed => "closed",
            LinkState::Opening => "opening",
            LinkState::Open => "open",
            LinkState::Faulted => "faulted",
        }
    }
}

/// 链路事件
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged {
        from: LinkState,
        to: LinkState,
        reason: Option<String>,
    },
    ReconnectScheduled {
        delay: Duration,
    },
}

/// 链路配置
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 无读写活动超过该时长即判定链路失效
    pub liveness_timeout: Duration,
    /// 重连退避初始间隔
    pub reconnect_base: Duration,
    /// 重连退避上限
    pub reconnect_max: Duration,
    /// 暂时性错误退避基数
    pub error_backoff_base: Duration,
    /// 暂时性错误退避指数上限
    pub error_backoff_max_exponent: u32,
    /// 连续暂时性错误上限，超过后按致命错误处理
    pub max_transient_errors: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
            error_backoff_base: Duration::from_millis(100),
            error_backoff_max_exponent: 6,
            max_transient_errors: 10,
        }
    }
}

impl LinkConfig {
    /// 存活检测周期（超时的一半）
    pub fn liveness_interval(&self) -> Duration {
        self.liveness_timeout / 2
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

const READ_CHUNK: usize = 4096;

/// 与 MCU 之间的唯一链路
///
/// 重连时在原地替换字节流，不会同时存在两个连接。
/// 每次成功打开 `generation` 加一，事件循环据此重新注册文件描述符。
pub struct Link {
    connector: Box<dyn Connector>,
    reset: Box<dyn ResetLine>,
    config: LinkConfig,
    state: LinkState,
    stream: Option<Box<dyn Transport>>,
    generation: u64,
    last_activity: Instant,
    errors: u32,
    reconnect: Backoff,
    reconnect_at: Option<Instant>,
    liveness_at: Option<Instant>,
    read_paused_until: Option<Instant>,
    write_paused_until: Option<Instant>,
    last_error: Option<String>,
    events: Vec<LinkEvent>,
}

impl Link {
    pub fn new(
        connector: Box<dyn Connector>,
        reset: Box<dyn ResetLine>,
        config: LinkConfig,
        now: Instant,
    ) -> Self {
        let reconnect = Backoff::new(config.reconnect_base, config.reconnect_max);
        Self {
            connector,
            reset,
            config,
            state: LinkState::Closed,
            stream: None,
            generation: 0,
            last_activity: now,
            errors: 0,
            reconnect,
            reconnect_at: None,
            liveness_at: None,
            read_paused_until: None,
            write_paused_until: None,
            last_error: None,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().and_then(|s| s.raw_fd())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.errors
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// 取出累积的事件
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    /// 复位 MCU 并打开字节流
    ///
    /// 失败时进入 `Faulted` 并安排重连。
    pub fn open(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == LinkState::Open {
            return Ok(());
        }

        self.cancel_timers();
        self.set_state(LinkState::Opening, None);
        self.pulse_reset();

        match self.connector.open() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.generation += 1;
                self.last_activity = now;
                self.errors = 0;
                self.last_error = None;
                self.reconnect.reset();
                self.liveness_at = Some(now + self.config.liveness_interval());
                info!("Link open: {}", self.connector.describe());
                self.set_state(LinkState::Open, None);
                Ok(())
            },
            Err(e) => {
                error!("Failed to open {}: {}", self.connector.describe(), e);
                self.fault(now, format!("open failed: {e}"));
                Err(LinkError::Io(e))
            },
        }
    }

    /// 关闭链路，取消所有计时器（可重复调用）
    pub fn close(&mut self) {
        self.cancel_timers();
        if self.stream.take().is_some() {
            debug!("Link stream released");
        }
        self.set_state(LinkState::Closed, None);
    }

    /// 读出当前所有可读字节（非阻塞）
    pub fn read_available(&mut self, now: Instant) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.is_open() || self.read_paused_until.is_some() {
            return out;
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    self.last_activity = now;
                    self.errors = 0;
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.on_io_error(now, Direction::Read, e);
                    break;
                },
            }
        }
        out
    }

    /// 是否可以尝试写入
    pub fn can_write(&self) -> bool {
        self.is_open() && self.write_paused_until.is_none()
    }

    /// 写入尽可能多的字节，返回实际写入数
    ///
    /// 返回 0 表示现在不能写（缓冲区满、写方向退避中或链路未打开）。
    pub fn write(&mut self, now: Instant, data: &[u8]) -> usize {
        if data.is_empty() || !self.can_write() {
            return 0;
        }

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return 0;
            };
            match stream.write(data) {
                Ok(n) => {
                    if n > 0 {
                        self.last_activity = now;
                        self.errors = 0;
                    }
                    return n;
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.on_io_error(now, Direction::Write, e);
                    return 0;
                },
            }
        }
    }

    /// 丢弃尚未发出的输出（急停）
    pub fn flush_output(&mut self) {
        if let Some(stream) = self.stream.as_mut()
            && let Err(e) = stream.discard_output()
        {
            warn!("Failed to discard pending output: {}", e);
        }
    }

    /// 最近的截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.liveness_at,
            self.read_paused_until,
            self.write_paused_until,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// 处理所有已到期的计时器
    pub fn on_timer(&mut self, now: Instant) {
        if let Some(at) = self.read_paused_until
            && at <= now
        {
            self.read_paused_until = None;
            debug!("Link read re-enabled");
        }

        if let Some(at) = self.write_paused_until
            && at <= now
        {
            self.write_paused_until = None;
            debug!("Link write re-enabled");
        }

        if let Some(at) = self.liveness_at
            && at <= now
        {
            self.check_liveness(now);
        }

        if let Some(at) = self.reconnect_at
            && at <= now
        {
            self.reconnect_at = None;
            info!("Attempting to reconnect to {}", self.connector.describe());
            // 失败时 open() 已经安排了下一次重连
            let _ = self.open(now);
        }
    }

    fn check_liveness(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.last_activity);
        if idle > self.config.liveness_timeout {
            let err = LinkError::LivenessTimeout(idle);
            warn!("Link liveness check failed: {}", err);
            self.fault(now, err.to_string());
        } else {
            self.liveness_at = Some(now + self.config.liveness_interval());
        }
    }

    fn on_io_error(&mut self, now: Instant, direction: Direction, err: io::Error) {
        match classify(&err) {
            ErrorClass::Fatal => {
                error!("Fatal {:?} error on link: {}", direction, err);
                self.fault(now, format!("{direction:?} error: {err}"));
            },
            ErrorClass::Transient if self.errors >= self.config.max_transient_errors => {
                let err = LinkError::RetriesExhausted {
                    errors: self.errors + 1,
                    last: err.to_string(),
                };
                error!("{:?} error on link: {}", direction, err);
                self.fault(now, err.to_string());
            },
            ErrorClass::Transient => {
                self.errors += 1;
                let delay = local_error_delay(
                    self.config.error_backoff_base,
                    self.errors,
                    self.config.error_backoff_max_exponent,
                );
                warn!(
                    "{:?} error on link ({} consecutive), pausing for {:?}: {}",
                    direction, self.errors, delay, err
                );
                self.last_error = Some(err.to_string());
                match direction {
                    Direction::Read => self.read_paused_until = Some(now + delay),
                    Direction::Write => self.write_paused_until = Some(now + delay),
                }
            },
        }
    }

    fn fault(&mut self, now: Instant, reason: String) {
        self.stream = None;
        self.liveness_at = None;
        self.read_paused_until = None;
        self.write_paused_until = None;
        self.last_error = Some(reason.clone());
        self.set_state(LinkState::Faulted, Some(reason));

        let delay = self.reconnect.next_delay();
        self.reconnect_at = Some(now + delay);
        info!("Reconnect scheduled in {:?}", delay);
        self.events.push(LinkEvent::ReconnectScheduled { delay });
    }

    fn cancel_timers(&mut self) {
        self.reconnect_at = None;
        self.liveness_at = None;
        self.read_paused_until = None;
        self.write_paused_until = None;
    }

    fn pulse_reset(&mut self) {
        if let Err(e) = self.reset.assert() {
            warn!("Failed to assert MCU reset: {}", e);
        }
        if let Err(e) = self.reset.release() {
            warn!("Failed to release MCU reset: {}", e);
        }
    }

    fn set_state(&mut self, to: LinkState, reason: Option<String>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!("Link state {} -> {}", from.as_str(), to.as_str());
        self.events.push(LinkEvent::StateChanged { from, to, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::NoReset;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        opens: VecDeque<bool>,
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
        resets: u32,
    }

    struct MockTransport(Rc<RefCell<Script>>);

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.borrow_mut().reads.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                },
                Some(Err(e)) => Err(e),
            }
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let mut script = self.0.borrow_mut();
            let n = match script.writes.pop_front() {
                None => data.len(),
                Some(Ok(n)) => n.min(data.len()),
                Some(Err(e)) => return Err(e),
            };
            script.written.extend_from_slice(&data[..n]);
            Ok(n)
        }
    }

    struct MockConnector(Rc<RefCell<Script>>);

    impl Connector for MockConnector {
        fn open(&mut self) -> io::Result<Box<dyn Transport>> {
            let ok = self.0.borrow_mut().opens.pop_front().unwrap_or(true);
            if ok {
                Ok(Box::new(MockTransport(self.0.clone())))
            } else {
                Err(io::Error::from_raw_os_error(libc::ENOENT))
            }
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }

    struct CountingReset(Rc<RefCell<Script>>);

    impl ResetLine for CountingReset {
        fn assert(&mut self) -> io::Result<()> {
            self.0.borrow_mut().resets += 1;
            Ok(())
        }

        fn release(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn new_link(script: &Rc<RefCell<Script>>, now: Instant) -> Link {
        Link::new(
            Box::new(MockConnector(script.clone())),
            Box::new(NoReset),
            LinkConfig::default(),
            now,
        )
    }

    fn reconnect_delays(events: &[LinkEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::ReconnectScheduled { delay } => Some(delay.as_secs()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_open_emits_transitions() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let mut link = Link::new(
            Box::new(MockConnector(script.clone())),
            Box::new(CountingReset(script.clone())),
            LinkConfig::default(),
            t0,
        );

        link.open(t0).unwrap();
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(link.generation(), 1);
        assert_eq!(script.borrow().resets, 1);

        let events = link.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            LinkEvent::StateChanged { from: LinkState::Closed, to: LinkState::Opening, .. }
        ));
        assert!(matches!(
            events[1],
            LinkEvent::StateChanged { from: LinkState::Opening, to: LinkState::Open, .. }
        ));
    }

    #[test]
    fn test_reconnect_backoff_doubles_then_resets() {
        let script = Rc::new(RefCell::new(Script::default()));
        script.borrow_mut().opens.extend([false, false, false, true]);
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);

        assert!(link.open(t0).is_err());
        assert_eq!(link.state(), LinkState::Faulted);

        let mut now = t0;
        for _ in 0..3 {
            now = link.next_deadline().unwrap();
            link.on_timer(now);
        }
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(reconnect_delays(&link.take_events()), vec![5, 10, 20]);
        assert_eq!(now - t0, Duration::from_secs(35));

        // 重连成功后退避回到初始值
        script
            .borrow_mut()
            .reads
            .push_back(Err(io::Error::from_raw_os_error(libc::EIO)));
        link.read_available(now);
        assert_eq!(link.state(), LinkState::Faulted);
        assert_eq!(reconnect_delays(&link.take_events()), vec![5]);
    }

    #[test]
    fn test_reconnect_interval_capped() {
        let script = Rc::new(RefCell::new(Script::default()));
        script.borrow_mut().opens.extend([false; 8]);
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);

        let _ = link.open(t0);
        for _ in 0..7 {
            let at = link.next_deadline().unwrap();
            link.on_timer(at);
        }
        assert_eq!(
            reconnect_delays(&link.take_events()),
            vec![5, 10, 20, 40, 60, 60, 60, 60]
        );
    }

    #[test]
    fn test_liveness_timeout_faults_link() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);
        link.open(t0).unwrap();
        link.take_events();

        link.on_timer(t0 + Duration::from_secs(6));
        assert_eq!(link.state(), LinkState::Open);

        link.on_timer(t0 + Duration::from_secs(11));
        assert_eq!(link.state(), LinkState::Faulted);
        assert!(link.last_error().unwrap().contains("No activity"));
        let events = link.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            LinkEvent::StateChanged { from: LinkState::Open, to: LinkState::Faulted, reason: Some(_) }
        )));
        assert_eq!(reconnect_delays(&events), vec![5]);
    }

    #[test]
    fn test_activity_keeps_link_alive() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);
        link.open(t0).unwrap();

        script.borrow_mut().reads.push_back(Ok(b"{}\n".to_vec()));
        assert_eq!(link.read_available(t0 + Duration::from_secs(8)), b"{}\n");

        link.on_timer(t0 + Duration::from_secs(6));
        link.on_timer(t0 + Duration::from_secs(12));
        assert_eq!(link.state(), LinkState::Open);
    }

    #[test]
    fn test_transient_write_error_pauses_direction() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);
        link.open(t0).unwrap();

        script
            .borrow_mut()
            .writes
            .push_back(Err(io::Error::from_raw_os_error(libc::EINTR + 1000)));
        assert_eq!(link.write(t0, b"h\n"), 0);
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(link.consecutive_errors(), 1);
        assert!(!link.can_write());
        assert_eq!(link.next_deadline(), Some(t0 + Duration::from_millis(200)));

        link.on_timer(t0 + Duration::from_millis(200));
        assert!(link.can_write());
        assert_eq!(link.write(t0 + Duration::from_millis(200), b"h\n"), 2);
        assert_eq!(link.consecutive_errors(), 0);
        assert_eq!(script.borrow().written, b"h\n");
    }

    #[test]
    fn test_partial_write() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);
        link.open(t0).unwrap();

        script.borrow_mut().writes.push_back(Ok(3));
        assert_eq!(link.write(t0, b"#id=1\n"), 3);
        assert_eq!(link.write(t0, b"=1\n"), 3);
        assert_eq!(script.borrow().written, b"#id=1\n");
    }

    #[test]
    fn test_close_is_idempotent_and_cancels_timers() {
        let script = Rc::new(RefCell::new(Script::default()));
        script.borrow_mut().opens.push_back(false);
        let t0 = Instant::now();
        let mut link = new_link(&script, t0);
        let _ = link.open(t0);
        assert!(link.next_deadline().is_some());

        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.next_deadline(), None);
        assert_eq!(link.write(t0, b"h\n"), 0);
        assert!(link.read_available(t0).is_empty());
    }

    #[test]
    fn test_transient_errors_escalate_after_budget() {
        let script = Rc::new(RefCell::new(Script::default()));
        let t0 = Instant::now();
        let config = LinkConfig {
            max_transient_errors: 2,
            ..LinkConfig::default()
        };
        let mut link = Link::new(
            Box::new(MockConnector(script.clone())),
            Box::new(NoReset),
            config,
            t0,
        );
        link.open(t0).unwrap();
        link.take_events();

        let mut now = t0;
        for expected in 1..=2 {
            script
                .borrow_mut()
                .reads
                .push_back(Err(io::Error::from_raw_os_error(libc::EAGAIN + 1000)));
            assert!(link.read_available(now).is_empty());
            assert_eq!(link.state(), LinkState::Open);
            assert_eq!(link.consecutive_errors(), expected);

            now += Duration::from_secs(1);
            link.on_timer(now);
        }

        script
            .borrow_mut()
            .reads
            .push_back(Err(io::Error::from_raw_os_error(libc::EAGAIN + 1000)));
        assert!(link.read_available(now).is_empty());
        assert_eq!(link.state(), LinkState::Faulted);
        assert!(link.last_error().unwrap().contains("3 consecutive"));

        let events = link.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            LinkEvent::StateChanged { to: LinkState::Faulted, reason: Some(_), .. }
        )));
        assert_eq!(reconnect_delays(&events), vec![5]);
    }
}
