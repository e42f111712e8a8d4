//! 事件循环
//!
//! 单线程 `mio::Poll` 循环驱动 [`Controller`]：
//!
//! - 串口文件描述符以边沿触发方式注册（读写两个方向），链路每次重新打开后按
//!   `generation` 重新注册
//! - 链路计时器（重连、存活检测、错误退避）、进度上报与会话清理都折算成
//!   `poll` 的超时
//! - 其它线程通过 [`RuntimeHandle`] 发送 [`Request`]，随后唤醒 [`Waker`]
//!
//! 每轮处理结束后发布状态快照，并把状态变化转发给各会话的 channel；
//! 会话接收端断开或空闲超时后被清理。

use crate::controller::Controller;
use crate::config::RuntimeSettings;
use crate::error::DriverError;
use crate::session::SessionRegistry;
use crate::state::{StateChange, StateView};
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use gantry_protocol::{Axis, AxisVector};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LINK: Token = Token(0);
const WAKE: Token = Token(1);

/// 会话清理周期
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// 发往事件循环的请求
pub enum Request {
    Attach {
        label: String,
        reply: Sender<Attached>,
    },
    Touch {
        session: u32,
        reply: Sender<Result<(), DriverError>>,
    },
    Detach {
        session: u32,
    },
    Start {
        path: String,
        reply: Sender<Result<(), DriverError>>,
    },
    Mdi {
        text: String,
        reply: Sender<Result<(), DriverError>>,
    },
    Home {
        axis: Option<Axis>,
        position: Option<f64>,
        reply: Sender<Result<(), DriverError>>,
    },
    Unhome {
        axis: Axis,
        reply: Sender<Result<(), DriverError>>,
    },
    Jog {
        axes: AxisVector,
        reply: Sender<Result<(), DriverError>>,
    },
    SetPosition {
        axis: Axis,
        position: f64,
        reply: Sender<Result<(), DriverError>>,
    },
    OverrideFeed {
        value: f64,
        reply: Sender<Result<(), DriverError>>,
    },
    OverrideSpeed {
        value: f64,
        reply: Sender<Result<(), DriverError>>,
    },
    Set {
        code: String,
        value: String,
        reply: Sender<Result<(), DriverError>>,
    },
    AckMessage {
        id: u64,
        reply: Sender<bool>,
    },
    OptionalPause(bool),
    Stop,
    Restart,
    Reset,
    Estop,
    Clear,
    Pause,
    Unpause,
    Reboot,
    Shutdown,
}

/// 会话注册结果
pub struct Attached {
    pub session: u32,
    /// 最新完整状态
    pub view: StateView,
    /// 注册之后的每次状态变化
    pub changes: Receiver<StateChange>,
}

struct Subscriber {
    label: String,
    tx: Sender<StateChange>,
}

/// 事件循环句柄（可跨线程克隆）
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: Sender<Request>,
    waker: Arc<Waker>,
}

impl RuntimeHandle {
    pub fn send(&self, request: Request) -> Result<(), DriverError> {
        self.tx
            .send(request)
            .map_err(|_| DriverError::RuntimeStopped)?;
        self.waker.wake()?;
        Ok(())
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> Result<T, DriverError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(make(tx))?;
        rx.recv().map_err(|_| DriverError::RuntimeStopped)
    }

    pub fn attach(&self, label: &str) -> Result<Attached, DriverError> {
        self.call(|reply| Request::Attach {
            label: label.to_string(),
            reply,
        })
    }

    pub fn touch(&self, session: u32) -> Result<(), DriverError> {
        self.call(|reply| Request::Touch { session, reply })?
    }

    pub fn detach(&self, session: u32) -> Result<(), DriverError> {
        self.send(Request::Detach { session })
    }

    /// 加载上传目录中的程序
    pub fn start(&self, path: &str) -> Result<(), DriverError> {
        self.call(|reply| Request::Start {
            path: path.to_string(),
            reply,
        })?
    }

    pub fn mdi(&self, text: &str) -> Result<(), DriverError> {
        self.call(|reply| Request::Mdi {
            text: text.to_string(),
            reply,
        })?
    }

    /// 回零（`None` 为所有轴）
    pub fn home(&self, axis: Option<Axis>, position: Option<f64>) -> Result<(), DriverError> {
        self.call(|reply| Request::Home {
            axis,
            position,
            reply,
        })?
    }

    pub fn unhome(&self, axis: Axis) -> Result<(), DriverError> {
        self.call(|reply| Request::Unhome { axis, reply })?
    }

    pub fn jog(&self, axes: AxisVector) -> Result<(), DriverError> {
        self.call(|reply| Request::Jog { axes, reply })?
    }

    pub fn set_position(&self, axis: Axis, position: f64) -> Result<(), DriverError> {
        self.call(|reply| Request::SetPosition {
            axis,
            position,
            reply,
        })?
    }

    pub fn override_feed(&self, value: f64) -> Result<(), DriverError> {
        self.call(|reply| Request::OverrideFeed { value, reply })?
    }

    pub fn override_speed(&self, value: f64) -> Result<(), DriverError> {
        self.call(|reply| Request::OverrideSpeed { value, reply })?
    }

    /// 立即设置 MCU 变量
    pub fn set(&self, code: &str, value: &str) -> Result<(), DriverError> {
        self.call(|reply| Request::Set {
            code: code.to_string(),
            value: value.to_string(),
            reply,
        })?
    }

    pub fn ack_message(&self, id: u64) -> Result<bool, DriverError> {
        self.call(|reply| Request::AckMessage { id, reply })
    }

    pub fn stop(&self) -> Result<(), DriverError> {
        self.send(Request::Stop)
    }

    pub fn estop(&self) -> Result<(), DriverError> {
        self.send(Request::Estop)
    }

    pub fn shutdown(&self) -> Result<(), DriverError> {
        self.send(Request::Shutdown)
    }
}

pub struct Runtime {
    poll: Poll,
    controller: Controller,
    requests: Receiver<Request>,
    changes: Receiver<StateChange>,
    sessions: SessionRegistry<Subscriber>,
    registered: Option<(u64, RawFd)>,
    time_tick: Duration,
}

impl Runtime {
    pub fn new(
        mut controller: Controller,
        settings: &RuntimeSettings,
    ) -> Result<(Runtime, RuntimeHandle), DriverError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);
        let (tx, requests) = unbounded();
        let changes = controller.subscribe();

        let runtime = Runtime {
            poll,
            controller,
            requests,
            changes,
            sessions: SessionRegistry::new(settings.session_idle()),
            registered: None,
            time_tick: settings.time_tick(),
        };
        Ok((runtime, RuntimeHandle { tx, waker }))
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// 运行直到收到 [`Request::Shutdown`] 或所有句柄都被丢弃
    pub fn run(mut self) -> Result<(), DriverError> {
        let mut events = Events::with_capacity(64);
        let start = Instant::now();
        self.controller.open(start);
        let mut next_tick = start + self.time_tick;
        let mut next_sweep = start + SWEEP_INTERVAL;

        info!("Event loop started");
        loop {
            self.sync_registration(Instant::now());

            let now = Instant::now();
            let deadline = [self.controller.next_deadline(), Some(next_tick), Some(next_sweep)]
                .into_iter()
                .flatten()
                .min();
            let timeout = deadline.map(|d| d.saturating_duration_since(now));

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let now = Instant::now();
            for event in events.iter() {
                if event.token() != LINK {
                    continue;
                }
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    self.controller.on_readable(now);
                }
                if event.is_writable() {
                    self.controller.pump(now);
                }
            }

            if !self.drain_requests(now) {
                break;
            }

            if self.controller.next_deadline().is_some_and(|d| d <= now) {
                self.controller.on_timer(now);
            }

            if now >= next_tick {
                self.controller.tick(now);
                next_tick = now + self.time_tick;
            }

            if now >= next_sweep {
                for (id, subscriber) in self.sessions.evict_idle(now) {
                    info!("Session {} ({}) expired", id, subscriber.label);
                }
                next_sweep = now + SWEEP_INTERVAL;
            }

            self.forward_changes();
        }

        self.deregister();
        self.controller.close();
        self.forward_changes();
        info!("Event loop stopped");
        Ok(())
    }

    /// 处理所有排队的请求，返回 false 表示退出
    fn drain_requests(&mut self, now: Instant) -> bool {
        loop {
            let request = match self.requests.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    info!("All runtime handles dropped");
                    return false;
                },
            };
            if !self.handle_request(request, now) {
                return false;
            }
        }
    }

    fn handle_request(&mut self, request: Request, now: Instant) -> bool {
        let controller = &mut self.controller;
        match request {
            Request::Attach { label, reply } => {
                let (tx, changes) = unbounded();
                let session = self.sessions.create(
                    Subscriber {
                        label: label.clone(),
                        tx,
                    },
                    now,
                );
                info!("Session {} attached: {}", session, label);
                controller.publish();
                let _ = reply.send(Attached {
                    session,
                    view: controller.view(),
                    changes,
                });
            },
            Request::Touch { session, reply } => {
                let _ = reply.send(self.sessions.touch(session, now));
            },
            Request::Detach { session } => {
                if let Some(subscriber) = self.sessions.remove(session) {
                    info!("Session {} detached: {}", session, subscriber.label);
                }
            },
            Request::Start { path, reply } => {
                let _ = reply.send(controller.start(&path, now));
            },
            Request::Mdi { text, reply } => {
                let _ = reply.send(controller.mdi(&text, now));
            },
            Request::Home {
                axis,
                position,
                reply,
            } => {
                let _ = reply.send(controller.home(axis, position, now));
            },
            Request::Unhome { axis, reply } => {
                let _ = reply.send(controller.unhome(axis, now));
            },
            Request::Jog { axes, reply } => {
                let _ = reply.send(controller.jog(&axes, now));
            },
            Request::SetPosition {
                axis,
                position,
                reply,
            } => {
                let _ = reply.send(controller.set_position(axis, position, now));
            },
            Request::OverrideFeed { value, reply } => {
                let _ = reply.send(controller.override_feed(value, now));
            },
            Request::OverrideSpeed { value, reply } => {
                let _ = reply.send(controller.override_speed(value, now));
            },
            Request::Set { code, value, reply } => {
                let _ = reply.send(controller.set(&code, &value, now));
            },
            Request::AckMessage { id, reply } => {
                let _ = reply.send(controller.ack_message(id));
            },
            Request::OptionalPause(enable) => controller.optional_pause(enable),
            Request::Stop => controller.stop(now),
            Request::Restart => controller.restart(now),
            Request::Reset => controller.reset(),
            Request::Estop => controller.estop(now),
            Request::Clear => controller.clear(now),
            Request::Pause => controller.pause(now),
            Request::Unpause => controller.unpause(now),
            Request::Reboot => controller.reboot(now),
            Request::Shutdown => {
                info!("Shutdown requested");
                return false;
            },
        }
        controller.pump(now);
        true
    }

    /// 链路重新打开后重新注册文件描述符
    fn sync_registration(&mut self, now: Instant) {
        let current = if self.controller.link().is_open() {
            self.controller
                .raw_fd()
                .map(|fd| (self.controller.link().generation(), fd))
        } else {
            None
        };
        if current == self.registered {
            return;
        }

        self.deregister();
        let Some((generation, fd)) = current else {
            return;
        };

        let interest = Interest::READABLE | Interest::WRITABLE;
        match self.poll.registry().register(&mut SourceFd(&fd), LINK, interest) {
            Ok(()) => {
                debug!("Registered link fd {} (generation {})", fd, generation);
                self.registered = current;
                // 边沿触发：注册前已到达的数据不会再产生事件
                self.controller.on_readable(now);
            },
            Err(e) => warn!("Failed to register link fd {}: {}", fd, e),
        }
    }

    fn deregister(&mut self) {
        if let Some((_, fd)) = self.registered.take()
            && let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd))
        {
            // 旧描述符关闭时内核已自动移除
            debug!("Deregister fd {}: {}", fd, e);
        }
    }

    fn forward_changes(&mut self) {
        self.controller.publish();
        for change in self.changes.try_iter() {
            self.sessions.retain(|id, subscriber| {
                let alive = subscriber.tx.send(change.clone()).is_ok();
                if !alive {
                    debug!("Session {} receiver dropped", id);
                }
                alive
            });
        }
    }
}
